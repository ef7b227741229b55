//! Signature verification, ahead of any persistence.

use crate::error::{ReactorError, ReactorResult};
use docsync_model::Action;

/// Pluggable signature verification predicate.
///
/// Called before any state mutation or persistence. All signature material
/// lives on the action's signer context; the engine does no key management
/// of its own.
pub trait SignatureVerifier: Send + Sync {
    /// Verifies the signatures of one action.
    ///
    /// Only called for actions that carry a signer with at least one
    /// signature; the empty-signer and unsigned cases are handled by the
    /// pipeline itself.
    fn verify(&self, action: &Action) -> bool;
}

/// A verifier that accepts every signed action.
///
/// The back-compat default: deployments without signing infrastructure
/// keep working, while an explicitly empty signature list still fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct AcceptAllVerifier;

impl SignatureVerifier for AcceptAllVerifier {
    fn verify(&self, _action: &Action) -> bool {
        true
    }
}

/// Checks every action of a batch, failing fast on the first violation.
///
/// - no signer context: verification passes (unsigned)
/// - signer with zero signatures: an explicit failure naming the action
/// - otherwise: the pluggable predicate decides
pub fn verify_actions<'a>(
    actions: impl IntoIterator<Item = &'a Action>,
    verifier: &dyn SignatureVerifier,
) -> ReactorResult<()> {
    for action in actions {
        match action.signer() {
            None => {}
            Some(signer) if signer.signatures.is_empty() => {
                return Err(ReactorError::InvalidSignature {
                    action_id: action.id.clone(),
                });
            }
            Some(_) => {
                if !verifier.verify(action) {
                    return Err(ReactorError::InvalidSignature {
                        action_id: action.id.clone(),
                    });
                }
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use docsync_model::{ActionContext, Signature, Signer};
    use serde_json::json;

    struct RejectAll;
    impl SignatureVerifier for RejectAll {
        fn verify(&self, _action: &Action) -> bool {
            false
        }
    }

    fn signed_action(signatures: Vec<Signature>) -> Action {
        Action::new("SET", json!({}), "global").with_context(ActionContext {
            signer: Some(Signer {
                user: Some("alice".into()),
                app: None,
                signatures,
            }),
            ..Default::default()
        })
    }

    fn make_signature() -> Signature {
        Signature {
            timestamp_utc_ms: 1,
            signer_key: "key".into(),
            action_hash: "hash".into(),
            prev_state_hash: "prev".into(),
            signature_hex: "aa".into(),
        }
    }

    #[test]
    fn unsigned_action_passes() {
        let action = Action::new("SET", json!({}), "global");
        assert!(verify_actions([&action], &RejectAll).is_ok());
    }

    #[test]
    fn empty_signature_list_fails_naming_the_action() {
        let action = signed_action(vec![]);
        let err = verify_actions([&action], &AcceptAllVerifier).unwrap_err();
        match err {
            ReactorError::InvalidSignature { action_id } => assert_eq!(action_id, action.id),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn predicate_decides_for_signed_actions() {
        let action = signed_action(vec![make_signature()]);
        assert!(verify_actions([&action], &AcceptAllVerifier).is_ok());
        assert!(verify_actions([&action], &RejectAll).is_err());
    }

    #[test]
    fn fails_fast_on_first_violation() {
        let good = signed_action(vec![make_signature()]);
        let bad = signed_action(vec![]);
        let also_checked = signed_action(vec![make_signature()]);

        let err = verify_actions([&good, &bad, &also_checked], &AcceptAllVerifier).unwrap_err();
        match err {
            ReactorError::InvalidSignature { action_id } => assert_eq!(action_id, bad.id),
            other => panic!("unexpected error: {other}"),
        }
    }
}
