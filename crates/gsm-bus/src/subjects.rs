//! Subject layout for correlated traffic.
//!
//! Requests for action `a` travel on `{prefix}.request.a` and broadcasts on
//! `{prefix}.broadcast.a`. Actions may contain dots and so span several
//! subject tokens.

use crate::BusError;

pub const DEFAULT_PREFIX: &str = "greentic.corr";

/// ```
/// use gsm_bus::subjects::request_subject;
///
/// assert_eq!(
///     request_subject("greentic.corr", "orders.create").unwrap(),
///     "greentic.corr.request.orders.create"
/// );
/// ```
pub fn request_subject(prefix: &str, action: &str) -> Result<String, BusError> {
    Ok(format!("{prefix}.request.{}", action_tokens(action)?))
}

/// ```
/// use gsm_bus::subjects::broadcast_subject;
///
/// assert_eq!(
///     broadcast_subject("greentic.corr", "orders.completed").unwrap(),
///     "greentic.corr.broadcast.orders.completed"
/// );
/// ```
pub fn broadcast_subject(prefix: &str, action: &str) -> Result<String, BusError> {
    Ok(format!("{prefix}.broadcast.{}", action_tokens(action)?))
}

pub fn request_wildcard(prefix: &str) -> String {
    format!("{prefix}.request.>")
}

pub fn broadcast_wildcard(prefix: &str) -> String {
    format!("{prefix}.broadcast.>")
}

fn action_tokens(action: &str) -> Result<&str, BusError> {
    let valid = !action.is_empty()
        && action.split('.').all(|token| {
            !token.is_empty()
                && !token
                    .chars()
                    .any(|c| c.is_whitespace() || c == '*' || c == '>')
        });
    if valid {
        Ok(action)
    } else {
        Err(BusError::InvalidToken(action.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wildcards_cover_every_action() {
        assert_eq!(request_wildcard("p"), "p.request.>");
        assert_eq!(broadcast_wildcard("p"), "p.broadcast.>");
    }

    #[test]
    fn rejects_tokens_nats_would_misread() {
        for bad in ["", "orders created", "orders.*", "orders.>", "orders..x", ".orders"] {
            assert!(
                matches!(request_subject("p", bad), Err(BusError::InvalidToken(_))),
                "{bad:?} should be rejected"
            );
        }
    }
}
