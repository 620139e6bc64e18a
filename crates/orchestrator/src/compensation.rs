//! Compensation engine: reverse-order unwinding of completed steps.

use domain::{Saga, StepStatus};

use crate::invoker::StepActionInvoker;

/// Walks the steps before the cursor in reverse order and invokes their
/// compensating actions.
///
/// Later steps compensate before earlier ones, mirroring transactional
/// rollback. Steps that never completed, or that have no compensation
/// action, keep their original status. A compensating action that fails
/// marks its step `CompensationFailed` and the walk continues with the
/// remaining steps; the saga still ends in `Compensated`.
pub(crate) async fn unwind<I: StepActionInvoker>(saga: &mut Saga, invoker: &I) {
    if !saga.begin_compensation() {
        return;
    }
    metrics::counter!("saga_compensations_total").increment(1);
    tracing::info!(saga_id = %saga.saga_id(), "compensation started");

    let boundary = saga.current_step_index().min(saga.steps().len());
    for index in (0..boundary).rev() {
        let action = {
            let step = &saga.steps()[index];
            if step.status() != StepStatus::Completed || !step.has_compensation() {
                continue;
            }
            match step.compensation_action_type() {
                Some(action) => action.to_string(),
                None => continue,
            }
        };

        if !saga.begin_step_compensation(index) {
            continue;
        }

        match invoker.compensate(&action, saga.state()).await {
            Ok(()) => {
                saga.finish_step_compensation(index);
                tracing::info!(
                    saga_id = %saga.saga_id(),
                    step = %saga.steps()[index].step_name(),
                    "step compensated"
                );
            }
            Err(error) => {
                metrics::counter!("saga_compensation_failures_total").increment(1);
                tracing::warn!(
                    saga_id = %saga.saga_id(),
                    step = %saga.steps()[index].step_name(),
                    %error,
                    "compensation step failed, continuing"
                );
                saga.fail_step_compensation(index, &error.to_string());
            }
        }
    }

    saga.finish_compensation();
    tracing::info!(saga_id = %saga.saga_id(), "compensation finished");
}
