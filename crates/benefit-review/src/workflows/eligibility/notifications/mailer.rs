use super::action::NotificationAction;
use crate::workflows::eligibility::gateways::TemplateGroup;

/// Template group and message a notification action is rendered with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailerRoute {
    pub template_group: TemplateGroup,
    pub message: String,
}

impl MailerRoute {
    fn application(message: &str) -> Self {
        Self {
            template_group: TemplateGroup::ApplicationNotifications,
            message: message.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("no handler configured for {action}")]
pub struct UnroutableAction {
    pub action: String,
}

/// Fixed action table plus the single `medical_certification_*` wildcard rule.
pub fn resolve_route(action: &NotificationAction) -> Result<MailerRoute, UnroutableAction> {
    use NotificationAction::*;

    let route = match action {
        AccountCreated => MailerRoute::application("account_created"),
        ProofApproved => MailerRoute::application("proof_approved"),
        ProofRejected | IncomeProofRejected | ResidencyProofRejected => {
            MailerRoute::application("proof_rejected")
        }
        DocumentsRequested => MailerRoute::application("documents_requested"),
        ApplicationApproved => MailerRoute::application("application_approved"),
        ApplicationRejected => MailerRoute::application("application_rejected"),
        MaxRejectionsReached => MailerRoute::application("max_rejections_reached"),
        MedicalCertification(suffix) => MailerRoute {
            template_group: TemplateGroup::MedicalProvider,
            message: suffix.clone(),
        },
        Other(raw) => {
            return Err(UnroutableAction {
                action: raw.clone(),
            })
        }
    };

    Ok(route)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn proof_rejections_share_a_template() {
        for raw in [
            "proof_rejected",
            "income_proof_rejected",
            "residency_proof_rejected",
        ] {
            let route = resolve_route(&NotificationAction::parse(raw)).expect("routed");
            assert_eq!(route.template_group, TemplateGroup::ApplicationNotifications);
            assert_eq!(route.message, "proof_rejected");
        }
    }

    #[test]
    fn certification_actions_use_provider_templates() {
        let route = resolve_route(&NotificationAction::parse("medical_certification_rejected"))
            .expect("routed");
        assert_eq!(route.template_group, TemplateGroup::MedicalProvider);
        assert_eq!(route.message, "rejected");
    }

    #[test]
    fn unknown_actions_have_no_handler() {
        let error = resolve_route(&NotificationAction::parse("trainer_assigned"))
            .expect_err("unrouted");
        assert_eq!(error.to_string(), "no handler configured for trainer_assigned");
    }
}
