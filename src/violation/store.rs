//! In-memory violation store.

use std::collections::VecDeque;
use std::time::SystemTime;

use parking_lot::RwLock;

/// Maximum number of retained violations.
pub const MAX_VIOLATIONS: usize = 100;

/// How many leading bytes of the command feed the correlation tag.
pub const LOG_TAG_COMMAND_BYTES: usize = 100;

/// A sandbox violation observed at runtime.
#[derive(Debug, Clone)]
pub struct SandboxViolationEvent {
    /// The violation detail extracted from the log line.
    pub line: String,
    /// The decoded command that triggered the violation, when known.
    pub command: Option<String>,
    /// Base64 of the command's first [`LOG_TAG_COMMAND_BYTES`] bytes.
    pub encoded_command: Option<String>,
    /// When the violation was recorded.
    pub timestamp: SystemTime,
}

impl SandboxViolationEvent {
    pub fn new(line: String, command: Option<String>, encoded_command: Option<String>) -> Self {
        Self {
            line,
            command,
            encoded_command,
            timestamp: SystemTime::now(),
        }
    }
}

/// Encode a command into its violation correlation key.
pub fn encode_command(command: &str) -> String {
    use base64::Engine;
    let mut end = command.len().min(LOG_TAG_COMMAND_BYTES);
    // Stay on a char boundary when the cutoff lands mid-UTF-8.
    while end > 0 && !command.is_char_boundary(end) {
        end -= 1;
    }
    base64::engine::general_purpose::STANDARD.encode(&command.as_bytes()[..end])
}

type Listener = Box<dyn Fn(&[SandboxViolationEvent]) + Send + Sync>;

/// Bounded store of recent violations with subscription semantics:
/// listeners see the current snapshot on subscribe and the full retained
/// list after every addition.
pub struct SandboxViolationStore {
    violations: RwLock<VecDeque<SandboxViolationEvent>>,
    total_count: RwLock<usize>,
    listeners: RwLock<Vec<(usize, Listener)>>,
    next_listener_id: RwLock<usize>,
}

impl Default for SandboxViolationStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SandboxViolationStore {
    pub fn new() -> Self {
        Self {
            violations: RwLock::new(VecDeque::with_capacity(MAX_VIOLATIONS)),
            total_count: RwLock::new(0),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: RwLock::new(0),
        }
    }

    /// Record a violation, trimming the ring and notifying listeners.
    pub fn add(&self, violation: SandboxViolationEvent) {
        let snapshot: Vec<SandboxViolationEvent> = {
            let mut violations = self.violations.write();
            violations.push_back(violation);
            if violations.len() > MAX_VIOLATIONS {
                violations.pop_front();
            }
            *self.total_count.write() += 1;
            violations.iter().cloned().collect()
        };

        let listeners = self.listeners.read();
        for (_, listener) in listeners.iter() {
            listener(&snapshot);
        }
    }

    /// All retained violations, oldest first.
    pub fn all(&self) -> Vec<SandboxViolationEvent> {
        self.violations.read().iter().cloned().collect()
    }

    /// Number of currently retained violations.
    pub fn len(&self) -> usize {
        self.violations.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.violations.read().is_empty()
    }

    /// Total recorded, including trimmed entries.
    pub fn total_count(&self) -> usize {
        *self.total_count.read()
    }

    /// Violations correlated to `command` via its encoded tag.
    pub fn for_command(&self, command: &str) -> Vec<SandboxViolationEvent> {
        let key = encode_command(command);
        self.violations
            .read()
            .iter()
            .filter(|v| v.encoded_command.as_deref() == Some(key.as_str()))
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.violations.write().clear();
        *self.total_count.write() = 0;
    }

    /// Subscribe to additions. The listener is invoked synchronously with
    /// the current snapshot before this returns. The returned id feeds
    /// [`Self::unsubscribe`].
    pub fn subscribe(&self, listener: Listener) -> usize {
        let snapshot = self.all();
        listener(&snapshot);

        let id = {
            let mut next = self.next_listener_id.write();
            let id = *next;
            *next += 1;
            id
        };
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: usize) {
        self.listeners.write().retain(|(lid, _)| *lid != id);
    }
}
