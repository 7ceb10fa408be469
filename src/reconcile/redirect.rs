//! Where to send the browser after a gateway return.

use rusqlite::Connection;

use super::resolve_linkage;
use crate::db::queries;
use crate::error::{Result, msg};
use crate::models::{PaymentRecord, StepType};
use crate::util::append_query_params;

/// Outcome the shopper should see.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnDisposition {
    Success,
    /// Carries the user-facing flash message.
    Failure(&'static str),
    Pending,
}

/// Funnel by metadata slug, then metadata id, then the funnel-order row.
/// Orders with no resolvable funnel go to the generic confirmation page.
pub fn resolve_return_redirect(
    conn: &Connection,
    base_url: &str,
    order: &dyn PaymentRecord,
    disposition: ReturnDisposition,
) -> Result<String> {
    let base_url = base_url.trim_end_matches('/');

    let Some(linkage) = resolve_linkage(conn, order)? else {
        let confirmation = format!(
            "{}/orders/{}/confirmation",
            base_url,
            urlencoding::encode(order.order_number())
        );
        return Ok(match disposition {
            ReturnDisposition::Success => confirmation,
            ReturnDisposition::Failure(message) => append_query_params(&confirmation, &[("message", message)]),
            ReturnDisposition::Pending => append_query_params(
                &confirmation,
                &[("status", "pending"), ("message", msg::PAYMENT_PENDING)],
            ),
        });
    };

    let funnel_root = format!("{}/f/{}", base_url, linkage.funnel.slug);
    let step_url = |slug: &str| format!("{}/{}", funnel_root, slug);

    let url = match disposition {
        ReturnDisposition::Success => {
            match queries::get_first_step_of_type(conn, &linkage.funnel.id, StepType::Thankyou)? {
                Some(step) => step_url(&step.slug),
                None => append_query_params(&funnel_root, &[("completed", "1")]),
            }
        }
        ReturnDisposition::Failure(message) => {
            let checkout = match linkage.step.filter(|s| s.step_type == StepType::Checkout) {
                Some(step) => Some(step),
                None => queries::get_first_step_of_type(conn, &linkage.funnel.id, StepType::Checkout)?,
            };
            let target = checkout
                .map(|s| step_url(&s.slug))
                .unwrap_or_else(|| funnel_root.clone());
            append_query_params(&target, &[("message", message)])
        }
        ReturnDisposition::Pending => append_query_params(
            &funnel_root,
            &[("status", "pending"), ("message", msg::PAYMENT_PENDING)],
        ),
    };
    Ok(url)
}

/// Redirect when the order itself could not be identified.
pub fn order_not_found_redirect(base_url: &str) -> String {
    append_query_params(
        &format!("{}/", base_url.trim_end_matches('/')),
        &[("message", msg::ORDER_NOT_FOUND)],
    )
}
