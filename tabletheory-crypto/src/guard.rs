//! Query-time guard: rejects any predicate touching an encrypted attribute
//! before it reaches a `KeyCondition`/`Filter`/`Condition` expression. GCM
//! ciphertext never sorts or compares meaningfully, so these predicates
//! would silently return wrong results rather than fail loudly without it.

use tabletheory_core::EncryptionError;
use tabletheory_expr::Predicate;

/// Rejects the first predicate, if any, whose attribute resolves to an
/// encrypted field.
pub fn guard_predicates(
    predicates: &[Predicate],
    is_encrypted_attribute: impl Fn(&str) -> bool,
) -> Result<(), EncryptionError> {
    for predicate in predicates {
        if is_encrypted_attribute(&predicate.attribute) {
            return Err(EncryptionError::FieldNotQueryable {
                attr: predicate.attribute.clone(),
            });
        }
    }
    Ok(())
}
