//! KYC verification reference workflow.

use std::time::Duration;

use domain::{DefinitionError, SagaDefinition, StepDefinition};

/// The saga type identifier for KYC verification.
pub const SAGA_TYPE: &str = "KYC_VERIFICATION";

/// Step name: validate the submitted identity documents.
pub const STEP_VALIDATE_DOCUMENTS: &str = "ValidateDocuments";

/// Step name: verify the applicant's identity against the registry.
pub const STEP_VERIFY_IDENTITY: &str = "VerifyIdentity";

/// Step name: run the anti-money-laundering screening.
pub const STEP_CHECK_AML: &str = "CheckAML";

/// Step name: record the KYC approval.
pub const STEP_APPROVE_KYC: &str = "ApproveKYC";

/// Step name: notify the applicant of the outcome.
pub const STEP_SEND_NOTIFICATION: &str = "SendNotification";

/// Action type invoked for each step.
pub const ACTION_VALIDATE_DOCUMENTS: &str = "kyc.validate_documents";
pub const ACTION_VERIFY_IDENTITY: &str = "kyc.verify_identity";
pub const ACTION_CHECK_AML: &str = "kyc.check_aml";
pub const ACTION_APPROVE_KYC: &str = "kyc.approve";
pub const ACTION_SEND_NOTIFICATION: &str = "kyc.send_notification";

/// Compensating action types.
pub const COMPENSATION_DISCARD_DOCUMENTS: &str = "kyc.discard_documents";
pub const COMPENSATION_REVERT_IDENTITY: &str = "kyc.revert_identity";
pub const COMPENSATION_CLEAR_AML_FLAG: &str = "kyc.clear_aml_flag";
pub const COMPENSATION_REVOKE_APPROVAL: &str = "kyc.revoke_approval";

/// Builds the five-step KYC verification definition.
///
/// `SendNotification` is optional and has no compensating action: a failed
/// notification never rolls back an approved verification.
pub fn definition() -> Result<SagaDefinition, DefinitionError> {
    SagaDefinition::new(
        SAGA_TYPE,
        "KYC Verification",
        vec![
            StepDefinition::new(STEP_VALIDATE_DOCUMENTS, ACTION_VALIDATE_DOCUMENTS)
                .with_compensation(COMPENSATION_DISCARD_DOCUMENTS),
            StepDefinition::new(STEP_VERIFY_IDENTITY, ACTION_VERIFY_IDENTITY)
                .with_compensation(COMPENSATION_REVERT_IDENTITY),
            StepDefinition::new(STEP_CHECK_AML, ACTION_CHECK_AML)
                .with_compensation(COMPENSATION_CLEAR_AML_FLAG),
            StepDefinition::new(STEP_APPROVE_KYC, ACTION_APPROVE_KYC)
                .with_compensation(COMPENSATION_REVOKE_APPROVAL),
            StepDefinition::new(STEP_SEND_NOTIFICATION, ACTION_SEND_NOTIFICATION).optional(),
        ],
        Duration::from_secs(30),
        3,
    )
}
