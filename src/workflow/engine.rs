//! The step driver: a strict linear state machine fed by completion messages.
//!
//! Exactly one step task is in flight at any moment. The next task is only
//! created after the previous completion message has been consumed and its
//! discoveries merged, so each step sees the cumulative state of all prior
//! steps. Tasks get the run state by value and never touch shared state.

use crate::error::AppError;
use crate::wireguard::TunnelConfig;
use crate::workflow::{Step, StepId, StepOutcome, StepRequest, StepState};
use tokio::sync::mpsc::{self, UnboundedSender};

/// Accumulated run state threaded through the steps.
#[derive(Clone, Debug)]
pub struct RunState {
    pub bootstrap_user: String,
    pub host: String,
    pub addr: String,
    pub password: String,
    pub use_sudo: bool,
    pub pub_key_line: String,
    pub ready_as: String,
    pub wg: Option<TunnelConfig>,
}

impl RunState {
    pub fn new(bootstrap_user: &str, host: &str, addr: &str, password: &str) -> Self {
        Self {
            bootstrap_user: bootstrap_user.to_string(),
            host: host.to_string(),
            addr: addr.to_string(),
            password: password.to_string(),
            use_sudo: false,
            pub_key_line: String::new(),
            ready_as: String::new(),
            wg: None,
        }
    }

    fn request_for(&self, step: StepId) -> StepRequest {
        StepRequest {
            bootstrap_user: self.bootstrap_user.clone(),
            host: self.host.clone(),
            addr: self.addr.clone(),
            password: self.password.clone(),
            use_sudo: self.use_sudo,
            pub_key_line: self.pub_key_line.clone(),
            wg: self.wg.clone(),
            step,
        }
    }

    fn merge(&mut self, outcome: StepOutcome) {
        if let Some(use_sudo) = outcome.use_sudo {
            self.use_sudo = use_sudo;
        }
        if let Some(line) = outcome.pub_key_line {
            if !line.is_empty() {
                self.pub_key_line = line;
            }
        }
        if let Some(ready_as) = outcome.ready_as {
            if !ready_as.is_empty() {
                self.ready_as = ready_as;
            }
        }
        if let Some(wg) = outcome.wg {
            self.wg = Some(wg);
        }
    }
}

#[derive(Clone, Debug)]
pub enum EngineEvent {
    StepStarted { index: usize },
    StepFinished { index: usize, err: Option<String> },
}

pub struct WorkflowOutcome {
    pub steps: Vec<Step>,
    pub state: RunState,
    pub error: Option<AppError>,
}

fn emit(events: &Option<UnboundedSender<EngineEvent>>, ev: EngineEvent) {
    if let Some(tx) = events {
        let _ = tx.send(ev);
    }
}

fn spawn_step<E>(
    index: usize,
    request: StepRequest,
    executor: E,
    done: UnboundedSender<(usize, Result<StepOutcome, AppError>)>,
) where
    E: Fn(StepRequest) -> Result<StepOutcome, AppError> + Send + Sync + 'static,
{
    tokio::spawn(async move {
        let result = tokio::task::spawn_blocking(move || executor(request))
            .await
            .unwrap_or_else(|e| Err(AppError::Local(format!("step task join: {e}"))));
        let _ = done.send((index, result));
    });
}

/// Drive the step list to completion or the first failure.
///
/// On failure the run parks on the failed step: no further transitions happen
/// until the operator restarts the whole workflow from step 0.
pub async fn run_workflow<E>(
    steps: Vec<Step>,
    state: RunState,
    executor: E,
    events: Option<UnboundedSender<EngineEvent>>,
) -> WorkflowOutcome
where
    E: Fn(StepRequest) -> Result<StepOutcome, AppError> + Send + Sync + Clone + 'static,
{
    let mut steps = steps;
    let mut state = state;
    if steps.is_empty() {
        return WorkflowOutcome {
            steps,
            state,
            error: None,
        };
    }

    let (done_tx, mut done_rx) = mpsc::unbounded_channel();
    let mut index = 0usize;
    steps[index].state = StepState::Running;
    emit(&events, EngineEvent::StepStarted { index });
    spawn_step(
        index,
        state.request_for(steps[index].id),
        executor.clone(),
        done_tx.clone(),
    );

    while let Some((i, result)) = done_rx.recv().await {
        debug_assert_eq!(i, index, "completion for a step that is not running");
        match result {
            Err(e) => {
                steps[i].state = StepState::Failed;
                steps[i].err = Some(e.to_string());
                emit(
                    &events,
                    EngineEvent::StepFinished {
                        index: i,
                        err: Some(e.to_string()),
                    },
                );
                return WorkflowOutcome {
                    steps,
                    state,
                    error: Some(e),
                };
            }
            Ok(outcome) => {
                state.merge(outcome);
                steps[i].state = StepState::Done;
                emit(&events, EngineEvent::StepFinished { index: i, err: None });

                index += 1;
                if index >= steps.len() {
                    break;
                }
                steps[index].state = StepState::Running;
                emit(&events, EngineEvent::StepStarted { index });
                spawn_step(
                    index,
                    state.request_for(steps[index].id),
                    executor.clone(),
                    done_tx.clone(),
                );
            }
        }
    }

    WorkflowOutcome {
        steps,
        state,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::definitions;

    fn three_steps() -> Vec<Step> {
        definitions()
            .into_iter()
            .take(3)
            .map(|def| Step {
                id: def.id,
                label: def.label,
                state: StepState::Pending,
                err: None,
            })
            .collect()
    }

    #[tokio::test]
    async fn halts_on_first_failure() {
        let steps = three_steps();
        let failing_id = steps[1].id;
        let state = RunState::new("root", "h", "h:22", "pw");
        let outcome = run_workflow(
            steps,
            state,
            move |req: StepRequest| {
                if req.step == failing_id {
                    Err(AppError::Validation("boom".into()))
                } else {
                    Ok(StepOutcome::default())
                }
            },
            None,
        )
        .await;

        assert!(outcome.error.is_some());
        assert_eq!(outcome.steps[0].state, StepState::Done);
        assert_eq!(outcome.steps[1].state, StepState::Failed);
        assert!(outcome.steps[1].err.as_deref().unwrap().contains("boom"));
        assert_eq!(outcome.steps[2].state, StepState::Pending);
        assert!(outcome.steps[2].err.is_none());
    }

    #[tokio::test]
    async fn completes_all_steps_and_merges_discoveries() {
        let steps = three_steps();
        let first_id = steps[0].id;
        let second_id = steps[1].id;
        let state = RunState::new("alice", "h", "h:22", "pw");
        let outcome = run_workflow(
            steps,
            state,
            move |req: StepRequest| {
                if req.step == first_id {
                    return Ok(StepOutcome {
                        use_sudo: Some(true),
                        pub_key_line: Some("ssh-ed25519 AAAA".into()),
                        ..Default::default()
                    });
                }
                if req.step == second_id {
                    // Discoveries from step 0 must be visible here.
                    assert!(req.use_sudo);
                    assert_eq!(req.pub_key_line, "ssh-ed25519 AAAA");
                    return Ok(StepOutcome {
                        ready_as: Some("arc@h".into()),
                        ..Default::default()
                    });
                }
                Ok(StepOutcome::default())
            },
            None,
        )
        .await;

        assert!(outcome.error.is_none());
        assert!(outcome.steps.iter().all(|s| s.state == StepState::Done));
        assert!(outcome.state.use_sudo);
        assert_eq!(outcome.state.ready_as, "arc@h");
    }

    #[tokio::test]
    async fn none_outcome_fields_leave_state_untouched() {
        let steps = three_steps();
        let mut state = RunState::new("alice", "h", "h:22", "pw");
        state.use_sudo = true;
        state.pub_key_line = "existing".into();
        let outcome = run_workflow(
            steps,
            state,
            |_req: StepRequest| Ok(StepOutcome::default()),
            None,
        )
        .await;
        assert!(outcome.state.use_sudo);
        assert_eq!(outcome.state.pub_key_line, "existing");
    }

    #[tokio::test]
    async fn events_arrive_in_order() {
        let steps = three_steps();
        let state = RunState::new("root", "h", "h:22", "pw");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let outcome = run_workflow(
            steps,
            state,
            |_req: StepRequest| Ok(StepOutcome::default()),
            Some(tx),
        )
        .await;
        assert!(outcome.error.is_none());

        let mut seen = Vec::new();
        while let Ok(ev) = rx.try_recv() {
            seen.push(ev);
        }
        assert_eq!(seen.len(), 6);
        for (n, ev) in seen.iter().enumerate() {
            match ev {
                EngineEvent::StepStarted { index } => {
                    assert_eq!(n % 2, 0);
                    assert_eq!(*index, n / 2);
                }
                EngineEvent::StepFinished { index, err } => {
                    assert_eq!(n % 2, 1);
                    assert_eq!(*index, n / 2);
                    assert!(err.is_none());
                }
            }
        }
    }
}
