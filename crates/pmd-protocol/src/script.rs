use std::sync::Arc;
use std::time::Duration;

use regex::bytes::Regex;

use crate::error::ProtocolError;

/// A `Send` template, validated once at construction so the engine never has
/// to re-check slot counts at script-execution time.
///
/// Exactly one `%s` substitutes the current action's target; zero means the
/// template is emitted verbatim.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendTemplate {
    Literal(String),
    WithTarget { before: String, after: String },
}

impl SendTemplate {
    pub fn parse(fmt: &str) -> Result<Self, ProtocolError> {
        let slots = fmt.matches("%s").count();
        match slots {
            0 => Ok(SendTemplate::Literal(fmt.to_owned())),
            1 => {
                let idx = fmt.find("%s").expect("matches(\"%s\").count() == 1");
                Ok(SendTemplate::WithTarget {
                    before: fmt[..idx].to_owned(),
                    after: fmt[idx + 2..].to_owned(),
                })
            }
            n => Err(ProtocolError::TooManySlots(fmt.to_owned(), n)),
        }
    }

    /// Render the bytes to send, substituting `target` into the sole `%s`
    /// slot if one was declared.
    ///
    /// Callers validate target-requiredness against `Command` before
    /// building the action, so `WithTarget` paired with `None` should never
    /// occur in practice; it is still reported as an error rather than
    /// silently degraded.
    pub fn render(&self, target: Option<&str>) -> Result<String, ProtocolError> {
        match (self, target) {
            (SendTemplate::Literal(s), _) => Ok(s.clone()),
            (SendTemplate::WithTarget { before, after }, Some(t)) => {
                Ok(format!("{before}{t}{after}"))
            }
            (SendTemplate::WithTarget { .. }, None) => Err(ProtocolError::MissingTarget),
        }
    }

    pub fn requires_target(&self) -> bool {
        matches!(self, SendTemplate::WithTarget { .. })
    }
}

/// One `{ capture_index, plug_index }` entry in an `Expect`'s interpretation
/// map. `plug_index` is the position of the target plug in the *device's*
/// plug list — kept positional (rather than an owned `Node` reference) so a
/// single `Protocol` can be shared immutably across every device of the same
/// model, each with its own plug→node bindings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CaptureMapping {
    pub capture_index: usize,
    pub plug_index: usize,
}

/// The set of capture-group-to-plug mappings carried by one `Expect`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpretation {
    pub mappings: Vec<CaptureMapping>,
}

impl Interpretation {
    pub fn new(mappings: Vec<CaptureMapping>) -> Self {
        Interpretation { mappings }
    }
}

/// One element of a per-command script.
#[derive(Debug, Clone)]
pub enum ScriptElement {
    Send(SendTemplate),
    Expect {
        regex: Arc<Regex>,
        interpretation: Option<Arc<Interpretation>>,
    },
    Delay(Duration),
}

impl ScriptElement {
    /// Compile `pattern` and build an `Expect` element, so config loaders
    /// never need to reach for `regex::bytes::Regex` themselves just to
    /// report a load-time failure.
    pub fn parse_expect(
        pattern: &str,
        interpretation: Option<Arc<Interpretation>>,
    ) -> Result<Self, ProtocolError> {
        let regex = Regex::new(pattern).map_err(ProtocolError::Regex)?;
        Ok(ScriptElement::Expect {
            regex: Arc::new(regex),
            interpretation,
        })
    }
}

/// An immutable, ordered sequence of script elements implementing one
/// command on one device model. Cheap to clone (elements are `Arc`-backed
/// where they carry compiled state).
#[derive(Debug, Clone, Default)]
pub struct Script {
    pub elements: Vec<ScriptElement>,
}

impl Script {
    pub fn new(elements: Vec<ScriptElement>) -> Self {
        Script { elements }
    }

    pub fn get(&self, index: usize) -> Option<&ScriptElement> {
        self.elements.get(index)
    }

    pub fn len(&self) -> usize {
        self.elements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }
}
