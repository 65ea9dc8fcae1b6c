//! A small sequential state machine for composing asynchronous transfers.
//!
//! A machine owns an ordered list of states (plain indices `0..nr_states`), a
//! cursor, some run data and a completion handler. The state handler is invoked
//! every time the cursor moves. It either submits one transfer whose completion
//! later moves the cursor again, or moves the cursor itself when no I/O is needed.
//!
//! Transitions only *record* what should happen next; [`Ssm::drive`] executes the
//! recorded steps until the machine waits on I/O or finishes. This makes it legal
//! to call [`Ssm::next_state`], [`Ssm::jump_to_state`], [`Ssm::mark_completed`] and
//! [`Ssm::mark_failed`] both from a transfer completion and from inside the state
//! handler itself.
//!
//! The machine is moved in and out of its owner around every call, so the
//! handler receives the owner (`C`) by exclusive reference alongside the machine:
//!
//! ```
//! use synaptics_fp::Ssm;
//!
//! #[derive(Default)]
//! struct Ctx {
//!     visited: Vec<usize>,
//!     result: Option<bool>,
//! }
//!
//! fn run_state(ssm: &mut Ssm<Ctx, ()>, ctx: &mut Ctx) {
//!     ctx.visited.push(ssm.cur_state());
//!     ssm.next_state();
//! }
//!
//! fn done(ctx: &mut Ctx, _data: (), result: synaptics_fp::Result<()>) {
//!     ctx.result = Some(result.is_ok());
//! }
//!
//! let mut ctx = Ctx::default();
//! let ssm = Ssm::new("demo", 3, run_state, ());
//! assert!(ssm.start(&mut ctx, done).is_none());
//! assert_eq!(ctx.visited, vec![0, 1, 2]);
//! assert_eq!(ctx.result, Some(true));
//! ```

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Invoked whenever the machine enters a state.
pub type StateHandler<C, D> = fn(&mut Ssm<C, D>, &mut C);

/// Invoked exactly once when the machine completes or fails. Receives the run data back.
pub type CompletionHandler<C, D> = fn(&mut C, D, Result<()>);

#[derive(Debug)]
enum Step {
    /// Waiting for an external completion.
    Idle,
    /// The current state's handler must run.
    Run,
    Finish(Result<()>),
}

pub struct Ssm<C, D> {
    name: &'static str,
    nr_states: usize,
    cur_state: usize,
    handler: StateHandler<C, D>,
    done: Option<CompletionHandler<C, D>>,
    data: D,
    step: Step,
}

impl<C, D> Ssm<C, D> {
    /// Creates an idle machine. `nr_states` must be at least 1.
    pub fn new(name: &'static str, nr_states: usize, handler: StateHandler<C, D>, data: D) -> Self {
        debug_assert!(nr_states > 0);
        Self {
            name,
            nr_states,
            cur_state: 0,
            handler,
            done: None,
            data,
            step: Step::Idle,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn cur_state(&self) -> usize {
        self.cur_state
    }

    pub fn nr_states(&self) -> usize {
        self.nr_states
    }

    pub fn data(&self) -> &D {
        &self.data
    }

    pub fn data_mut(&mut self) -> &mut D {
        &mut self.data
    }

    /// True once a terminal transition has been recorded.
    pub fn is_finishing(&self) -> bool {
        matches!(self.step, Step::Finish(_))
    }

    /// Enters state 0 and drives the machine.
    ///
    /// Returns the machine if it is now waiting on I/O, or `None` when it ran to
    /// completion synchronously (in which case `done` has already been invoked).
    pub fn start(mut self, ctx: &mut C, done: CompletionHandler<C, D>) -> Option<Self> {
        debug!("[{}] starting", self.name);
        self.done = Some(done);
        self.cur_state = 0;
        self.step = Step::Run;
        self.drive(ctx)
    }

    /// Executes recorded transitions until the machine waits on I/O or finishes.
    pub fn drive(mut self, ctx: &mut C) -> Option<Self> {
        loop {
            match std::mem::replace(&mut self.step, Step::Idle) {
                Step::Idle => return Some(self),
                Step::Run => {
                    debug!("[{}] entering state {}", self.name, self.cur_state);
                    let handler = self.handler;
                    handler(&mut self, ctx);
                }
                Step::Finish(result) => {
                    match &result {
                        Ok(()) => debug!("[{}] completed", self.name),
                        Err(e) => {
                            debug!("[{}] failed in state {}: {}", self.name, self.cur_state, e)
                        }
                    }
                    let Ssm { data, done, .. } = self;
                    if let Some(done) = done {
                        done(ctx, data, result);
                    }
                    return None;
                }
            }
        }
    }

    /// Moves to the following state; leaving the last state completes the machine.
    pub fn next_state(&mut self) {
        if self.refuse_transition("next_state") {
            return;
        }
        if self.cur_state + 1 >= self.nr_states {
            self.step = Step::Finish(Ok(()));
        } else {
            self.cur_state += 1;
            self.step = Step::Run;
        }
    }

    pub fn jump_to_state(&mut self, state: usize) {
        if self.refuse_transition("jump_to_state") {
            return;
        }
        if state >= self.nr_states {
            warn!("[{}] jump to invalid state {}", self.name, state);
            self.step = Step::Finish(Err(Error::General(format!(
                "invalid state {} in state machine {}",
                state, self.name
            ))));
            return;
        }
        self.cur_state = state;
        self.step = Step::Run;
    }

    pub fn mark_completed(&mut self) {
        if self.refuse_transition("mark_completed") {
            return;
        }
        self.step = Step::Finish(Ok(()));
    }

    pub fn mark_failed(&mut self, error: Error) {
        if self.refuse_transition("mark_failed") {
            warn!("[{}] dropping error after completion: {}", self.name, error);
            return;
        }
        self.step = Step::Finish(Err(error));
    }

    fn refuse_transition(&self, what: &str) -> bool {
        if self.is_finishing() {
            warn!("[{}] {} called on a finished state machine", self.name, what);
            return true;
        }
        false
    }
}

impl<C, D: std::fmt::Debug> std::fmt::Debug for Ssm<C, D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ssm")
            .field("name", &self.name)
            .field("cur_state", &self.cur_state)
            .field("nr_states", &self.nr_states)
            .field("data", &self.data)
            .field("step", &self.step)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Ctx {
        visited: Vec<usize>,
        results: Vec<Result<()>>,
        fail_at: Option<usize>,
        wait_at: Option<usize>,
    }

    fn run_state(ssm: &mut Ssm<Ctx, u32>, ctx: &mut Ctx) {
        let state = ssm.cur_state();
        ctx.visited.push(state);
        *ssm.data_mut() += 1;
        if ctx.fail_at == Some(state) {
            ssm.mark_failed(Error::protocol("boom"));
        } else if ctx.wait_at == Some(state) {
            // completion arrives later from the outside
        } else {
            ssm.next_state();
        }
    }

    fn done(ctx: &mut Ctx, _data: u32, result: Result<()>) {
        ctx.results.push(result);
    }

    #[test]
    fn runs_linearly_to_completion() {
        let mut ctx = Ctx::default();
        let ssm = Ssm::new("linear", 4, run_state, 0);
        assert!(ssm.start(&mut ctx, done).is_none());
        assert_eq!(ctx.visited, vec![0, 1, 2, 3]);
        assert_eq!(ctx.results, vec![Ok(())]);
    }

    #[test]
    fn failure_ends_run_once() {
        let mut ctx = Ctx {
            fail_at: Some(1),
            ..Ctx::default()
        };
        let ssm = Ssm::new("fail", 4, run_state, 0);
        assert!(ssm.start(&mut ctx, done).is_none());
        assert_eq!(ctx.visited, vec![0, 1]);
        assert_eq!(ctx.results, vec![Err(Error::protocol("boom"))]);
    }

    #[test]
    fn waits_and_resumes_from_outside() {
        let mut ctx = Ctx {
            wait_at: Some(1),
            ..Ctx::default()
        };
        let mut ssm = Ssm::new("wait", 3, run_state, 0)
            .start(&mut ctx, done)
            .expect("machine should be waiting");
        assert_eq!(ssm.cur_state(), 1);
        assert!(ctx.results.is_empty());

        // simulated transfer completion
        ctx.wait_at = None;
        ssm.jump_to_state(0);
        let ssm = ssm.drive(&mut ctx);
        assert!(ssm.is_none());
        assert_eq!(ctx.visited, vec![0, 1, 0, 1, 2]);
        assert_eq!(ctx.results.len(), 1);
    }

    #[test]
    fn transitions_after_finish_are_ignored() {
        let mut ctx = Ctx {
            wait_at: Some(0),
            ..Ctx::default()
        };
        let mut ssm = Ssm::new("late", 2, run_state, 0)
            .start(&mut ctx, done)
            .expect("machine should be waiting");
        ssm.mark_completed();
        ssm.mark_failed(Error::protocol("late"));
        ssm.next_state();
        assert!(ssm.drive(&mut ctx).is_none());
        assert_eq!(ctx.results, vec![Ok(())]);
    }

    #[test]
    fn invalid_jump_fails_the_run() {
        let mut ctx = Ctx {
            wait_at: Some(0),
            ..Ctx::default()
        };
        let mut ssm = Ssm::new("jump", 2, run_state, 0)
            .start(&mut ctx, done)
            .expect("machine should be waiting");
        ssm.jump_to_state(7);
        assert!(ssm.drive(&mut ctx).is_none());
        assert!(matches!(ctx.results[0], Err(Error::General(_))));
    }

    #[test]
    fn run_data_is_handed_back() {
        fn keep(ctx: &mut Ctx, data: u32, result: Result<()>) {
            ctx.visited.push(data as usize);
            ctx.results.push(result);
        }
        let mut ctx = Ctx::default();
        assert!(Ssm::new("data", 2, run_state, 10).start(&mut ctx, keep).is_none());
        assert_eq!(ctx.visited, vec![0, 1, 12]);
    }
}
