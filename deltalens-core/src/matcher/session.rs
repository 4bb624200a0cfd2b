//! Splits one user's event stream into sessions.

use crate::types::Event;

/// One user's events, split at session markers.
#[derive(Debug, Clone, Default)]
pub struct UserSessions {
    /// Events seen before the first marker.
    pub pre_session: Vec<Event>,
    pub sessions: Vec<Vec<Event>>,
}

impl UserSessions {
    /// Pre-session bucket followed by every session. The pre-session bucket is
    /// always yielded, even when empty, so global indices stay aligned.
    pub fn extended(&self) -> impl Iterator<Item = &[Event]> {
        std::iter::once(self.pre_session.as_slice()).chain(self.sessions.iter().map(Vec::as_slice))
    }

    /// Every event in extended-session order; position is the global event index.
    pub fn events(&self) -> Vec<&Event> {
        self.extended().flatten().collect()
    }

    pub fn len(&self) -> usize {
        self.pre_session.len() + self.sessions.iter().map(Vec::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Incremental session builder fed one event at a time.
#[derive(Debug)]
pub struct Sessionizer {
    marker: String,
    index: i64,
    sessions: UserSessions,
}

impl Sessionizer {
    pub fn new(marker: &str) -> Self {
        Self {
            marker: marker.to_string(),
            index: -1,
            sessions: UserSessions::default(),
        }
    }

    pub fn push(&mut self, event: Event) {
        if event.name == self.marker {
            self.index += 1;
        }
        if self.index < 0 {
            self.sessions.pre_session.push(event);
            return;
        }
        let index = self.index as usize;
        match self.sessions.sessions.get_mut(index) {
            Some(session) => session.push(event),
            None => self.sessions.sessions.push(vec![event]),
        }
    }

    pub fn finish(self) -> UserSessions {
        self.sessions
    }
}

/// Sessionize a complete stream.
pub fn sessionize(events: impl IntoIterator<Item = Event>, marker: &str) -> UserSessions {
    let mut sessionizer = Sessionizer::new(marker);
    for event in events {
        sessionizer.push(event);
    }
    sessionizer.finish()
}
