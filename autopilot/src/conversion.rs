//! Conversion ledger - idempotent revenue attribution.

use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{info, warn};

use crate::ledger::{EventLedger, NewEvent};
use crate::queue::{JobPayload, JobQueue};
use crate::store::{ConversionInsert, CrmStore};
use crate::types::{
    AutopilotError, Contact, EventAction, EventMeta, EventStatus, Intent, Result, Sentiment,
};

/// A purchase reported by a commerce or payment integration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ConversionInput {
    pub workspace_id: String,
    pub contact_id: Option<String>,
    pub phone: Option<String>,
    pub reason: String,
    pub order_id: Option<String>,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub provider: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionOutcome {
    pub ok: bool,
    pub contact_id: String,
    pub deduped: bool,
}

impl ConversionOutcome {
    fn recorded(contact_id: String) -> Self {
        Self {
            ok: true,
            contact_id,
            deduped: false,
        }
    }

    fn deduped(contact_id: String) -> Self {
        Self {
            ok: true,
            contact_id,
            deduped: true,
        }
    }
}

/// Records conversions at most once per order id.
pub struct ConversionLedger {
    crm: Arc<dyn CrmStore>,
    ledger: EventLedger,
    queue: Arc<dyn JobQueue>,
}

impl ConversionLedger {
    pub fn new(crm: Arc<dyn CrmStore>, ledger: EventLedger, queue: Arc<dyn JobQueue>) -> Self {
        Self { crm, ledger, queue }
    }

    /// Record a conversion. Not gated by billing status.
    pub async fn mark_conversion(&self, input: ConversionInput) -> Result<ConversionOutcome> {
        let workspace_id = input.workspace_id.as_str();
        let workspace = self
            .crm
            .get_workspace(workspace_id)
            .await?
            .ok_or_else(|| AutopilotError::WorkspaceNotFound(workspace_id.to_string()))?;

        let order_id = input
            .order_id
            .as_deref()
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);

        if let Some(order_id) = &order_id {
            if let Some(existing) = self.ledger.find_conversion(workspace_id, order_id).await? {
                info!(workspace_id = %workspace_id, order_id = %order_id, "Conversion already recorded");
                return Ok(ConversionOutcome::deduped(existing.contact_id));
            }
        }

        let mut contact = self.resolve_contact(&input).await?;
        let reason = if input.reason.trim().is_empty() {
            "conversion".to_string()
        } else {
            input.reason.clone()
        };

        let event = NewEvent::new(
            workspace_id,
            contact.id.clone(),
            EventAction::Conversion,
            EventStatus::Executed,
            EventMeta::Conversion {
                order_id: order_id.clone(),
                amount: input.amount,
                currency: input.currency.clone(),
                provider: input.provider.clone(),
            },
        )
        .with_intent(Intent::Purchase)
        .with_reason(reason.clone());

        let (_, outcome) = self.ledger.insert_conversion(event).await?;
        if let ConversionInsert::Duplicate(existing) = outcome {
            info!(
                workspace_id = %workspace_id,
                order_id = ?order_id,
                "Conversion lost insert race; treating as duplicate"
            );
            return Ok(ConversionOutcome::deduped(existing.contact_id));
        }

        contact.purchase_probability = Some(100);
        contact.sentiment = Some(Sentiment::Positive);
        let contact_id = contact.id.clone();
        self.crm.update_contact(contact).await?;

        info!(
            workspace_id = %workspace_id,
            contact_id = %contact_id,
            order_id = ?order_id,
            amount = ?input.amount,
            "Conversion recorded"
        );

        if let Some(flow_id) = workspace.post_conversion_flow_id {
            let payload = JobPayload::FlowRun {
                workspace_id: workspace_id.to_string(),
                contact_id: contact_id.clone(),
                flow_id: flow_id.clone(),
                variables: json!({
                    "amount": input.amount,
                    "orderId": order_id,
                    "provider": input.provider,
                    "reason": reason,
                }),
            };
            if let Err(e) = self.queue.enqueue(payload, None).await {
                warn!(
                    workspace_id = %workspace_id,
                    flow_id = %flow_id,
                    error = %e,
                    "Post-conversion flow enqueue failed"
                );
            }
        }

        Ok(ConversionOutcome::recorded(contact_id))
    }

    async fn resolve_contact(&self, input: &ConversionInput) -> Result<Contact> {
        if let Some(contact_id) = input.contact_id.as_deref().filter(|id| !id.is_empty()) {
            if let Some(contact) = self.crm.get_contact(&input.workspace_id, contact_id).await? {
                return Ok(contact);
            }
        }
        if let Some(phone) = input.phone.as_deref().filter(|p| !p.is_empty()) {
            if let Some(contact) = self.crm.find_contact_by_phone(&input.workspace_id, phone).await? {
                return Ok(contact);
            }
        }

        let wanted = input
            .contact_id
            .clone()
            .or_else(|| input.phone.clone())
            .unwrap_or_default();
        Err(AutopilotError::ContactNotFound(wanted))
    }
}
