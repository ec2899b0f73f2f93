use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{MediationError, MediationResult};

/// Kind of sequence a continuation frame points into
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SequenceType {
    Named,
    Anonymous,
    Proxy,
    Api,
    Template,
}

impl fmt::Display for SequenceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SequenceType::Named => "NAMED",
            SequenceType::Anonymous => "ANON",
            SequenceType::Proxy => "PROXY_INSEQ",
            SequenceType::Api => "API_INSEQ",
            SequenceType::Template => "SEQUENCE_TEMPLATE",
        };
        f.write_str(name)
    }
}

/// Resumption descriptor: where mediation continues once an asynchronous
/// response arrives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationFrame {
    pub sequence_type: SequenceType,
    pub sequence_name: String,
    /// Index of the mediator to resume after
    pub position: usize,
}

impl ContinuationFrame {
    pub fn new<S: Into<String>>(sequence_type: SequenceType, sequence_name: S) -> Self {
        Self {
            sequence_type,
            sequence_name: sequence_name.into(),
            position: 0,
        }
    }

    /// Frame in the same sequence, resuming at `position`
    pub fn resume_at(&self, position: usize) -> Self {
        Self {
            sequence_type: self.sequence_type,
            sequence_name: self.sequence_name.clone(),
            position,
        }
    }
}

impl fmt::Display for ContinuationFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}",
            self.sequence_type, self.sequence_name, self.position
        )
    }
}

/// Ordered continuation frames, last pushed resumes first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContinuationStack {
    frames: Vec<ContinuationFrame>,
}

impl ContinuationStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: ContinuationFrame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<ContinuationFrame> {
        self.frames.pop()
    }

    pub fn peek(&self) -> Option<&ContinuationFrame> {
        self.frames.last()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// Frames from the bottom of the stack to the top
    pub fn iter(&self) -> impl Iterator<Item = &ContinuationFrame> {
        self.frames.iter()
    }

    pub fn clear(&mut self) {
        self.frames.clear();
    }

    /// Moves the top frame to `position`. Returns false on an empty stack.
    pub fn update_position(&mut self, position: usize) -> bool {
        match self.frames.last_mut() {
            Some(frame) => {
                frame.position = position;
                true
            }
            None => false,
        }
    }

    /// Pops the frame a response resumes at. A response arriving with an
    /// empty stack means the request side lost track of an outstanding call.
    pub fn resume(&mut self) -> MediationResult<ContinuationFrame> {
        self.frames.pop().ok_or_else(|| {
            MediationError::invariant("Continuation Stack Empty! Cannot resume the mediation flow")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frames_resume_last_pushed_first() {
        let mut stack = ContinuationStack::new();
        let root = ContinuationFrame::new(SequenceType::Proxy, "OrderProxy");
        stack.push(root.clone());
        stack.push(root.resume_at(3));
        stack.push(ContinuationFrame::new(SequenceType::Named, "enrich").resume_at(1));

        assert_eq!(stack.len(), 3);
        assert_eq!(stack.resume().unwrap().sequence_name, "enrich");
        assert_eq!(stack.resume().unwrap().position, 3);
        assert_eq!(stack.resume().unwrap(), root);
    }

    #[test]
    fn test_resume_on_empty_stack_is_invariant_violation() {
        let mut stack = ContinuationStack::new();
        let err = stack.resume().unwrap_err();
        assert!(matches!(err, MediationError::InvariantViolation(_)));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_resume_at_keeps_sequence_identity() {
        let frame = ContinuationFrame::new(SequenceType::Api, "orders-api");
        let next = frame.resume_at(4);
        assert_eq!(next.sequence_type, SequenceType::Api);
        assert_eq!(next.sequence_name, "orders-api");
        assert_eq!(next.position, 4);
        assert_eq!(next.to_string(), "API_INSEQ:orders-api@4");
    }

    #[test]
    fn test_update_position_moves_top_frame_only() {
        let mut stack = ContinuationStack::new();
        assert!(!stack.update_position(2));

        stack.push(ContinuationFrame::new(SequenceType::Proxy, "OrderProxy"));
        stack.push(ContinuationFrame::new(SequenceType::Anonymous, "branch-0"));
        assert!(stack.update_position(2));

        assert_eq!(stack.peek().map(|f| f.position), Some(2));
        assert_eq!(stack.iter().next().map(|f| f.position), Some(0));
    }
}
