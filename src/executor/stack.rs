//! The reentrant DApp stack
//!
//! One per task: a stack of active invocation frames. The nested-call
//! primitive consults it to decide between the reentrant persistence path
//! (an active frame for the target address exists) and a fresh top-level
//! hydration. Each frame walks a one-way state machine:
//!
//! CREATED -> HYDRATED -> RUNNING -> (COMMITTED | REVERTED)

use crate::executor::context::Address;
use crate::persistence::env::EnvironmentState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FramePhase {
    Created,
    Hydrated,
    Running,
    Committed,
    Reverted,
}

impl FramePhase {
    fn may_advance_to(self, next: FramePhase) -> bool {
        matches!(
            (self, next),
            (FramePhase::Created, FramePhase::Hydrated)
                | (FramePhase::Hydrated, FramePhase::Running)
                | (FramePhase::Running, FramePhase::Committed)
                | (FramePhase::Running, FramePhase::Reverted)
                // A failure before hydration completes still reverts.
                | (FramePhase::Created, FramePhase::Reverted)
                | (FramePhase::Hydrated, FramePhase::Reverted)
        )
    }
}

#[derive(Debug)]
pub struct Frame {
    pub address: Address,
    pub environment: EnvironmentState,
    phase: FramePhase,
}

impl Frame {
    pub fn new(address: Address, environment: EnvironmentState) -> Self {
        Self {
            address,
            environment,
            phase: FramePhase::Created,
        }
    }

    pub fn phase(&self) -> FramePhase {
        self.phase
    }

    /// Illegal transitions are implementation bugs, not user-reachable.
    pub fn advance(&mut self, next: FramePhase) {
        assert!(
            self.phase.may_advance_to(next),
            "illegal frame transition {:?} -> {:?}",
            self.phase,
            next
        );
        self.phase = next;
    }
}

#[derive(Debug, Default)]
pub struct ReentrantStack {
    frames: Vec<Frame>,
}

impl ReentrantStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Frame {
        self.frames.pop().expect("pop on an empty reentrant stack")
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Most recent frame for the address, if any.
    pub fn top_of_address(&self, address: Address) -> Option<&Frame> {
        self.frames.iter().rev().find(|f| f.address == address)
    }

    /// Exclusive access to the innermost frame.
    pub fn top_mut(&mut self) -> &mut Frame {
        self.frames.last_mut().expect("top_mut on an empty stack")
    }

    /// Record updated environment counters on the frame a nested commit
    /// resumes into: the most recent frame for the address below the
    /// innermost frame (which is the nested call itself).
    pub fn update_resumed_environment(&mut self, address: Address, environment: EnvironmentState) {
        let top = self.frames.len().saturating_sub(1);
        if let Some(frame) = self.frames[..top]
            .iter_mut()
            .rev()
            .find(|f| f.address == address)
        {
            frame.environment = environment;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        Address([tag; 32])
    }

    #[test]
    fn test_frame_state_machine_happy_path() {
        let mut frame = Frame::new(addr(1), EnvironmentState::initial());
        frame.advance(FramePhase::Hydrated);
        frame.advance(FramePhase::Running);
        frame.advance(FramePhase::Committed);
        assert_eq!(frame.phase(), FramePhase::Committed);
    }

    #[test]
    #[should_panic(expected = "illegal frame transition")]
    fn test_terminal_phase_is_terminal() {
        let mut frame = Frame::new(addr(1), EnvironmentState::initial());
        frame.advance(FramePhase::Hydrated);
        frame.advance(FramePhase::Running);
        frame.advance(FramePhase::Committed);
        frame.advance(FramePhase::Running);
    }

    #[test]
    fn test_top_of_address_finds_most_recent() {
        let mut stack = ReentrantStack::new();
        stack.push(Frame::new(addr(1), EnvironmentState::initial()));
        stack.push(Frame::new(addr(2), EnvironmentState::initial()));
        let mut inner = Frame::new(addr(1), EnvironmentState::initial());
        inner.environment.next_hash_code = 42;
        stack.push(inner);

        assert_eq!(
            stack.top_of_address(addr(1)).unwrap().environment.next_hash_code,
            42
        );
        assert!(stack.top_of_address(addr(3)).is_none());
    }
}
