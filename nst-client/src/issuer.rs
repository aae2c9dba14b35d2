//! Admin issuance of gift codes.

use nst_core::{normalize_code, GiftCode, NstError, NstResult, StorageError, ValidationError, CODES_PREFIX};
use nst_storage::code_path;
use rand::Rng;

use crate::context::StoreContext;

/// Characters of generated codes; no 0/O or 1/I lookalikes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Fresh codes to try before giving up on a generated code.
const GENERATE_ATTEMPTS: usize = 5;

/// Random code of the form `NST-XXXX-XXXX`.
pub fn generate_code() -> String {
    let mut rng = rand::rng();
    let mut group = || -> String {
        (0..4)
            .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
            .collect()
    };
    let first = group();
    let second = group();
    format!("NST-{}-{}", first, second)
}

pub struct GiftCodeIssuer {
    ctx: StoreContext,
}

impl GiftCodeIssuer {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }

    /// Create `code` worth `amount` credits. Fails with a conflict when a
    /// record already exists under it.
    pub async fn issue(&self, code: &str, amount: u64) -> NstResult<GiftCode> {
        let code = normalize_code(code);
        if code.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "code".to_string(),
            }
            .into());
        }
        let gift = GiftCode::new(&code, amount);
        let path = code_path(&code);

        let existing = self
            .ctx
            .remote("get_versioned", self.ctx.tree().get_versioned(&path))
            .await?;
        if existing.value.is_some() {
            return Err(StorageError::Conflict { path }.into());
        }
        let created = self
            .ctx
            .remote(
                "set_if_match",
                self.ctx
                    .tree()
                    .set_if_match(&path, serde_json::to_value(&gift)?, &existing.etag),
            )
            .await?;
        if !created {
            return Err(StorageError::Conflict { path }.into());
        }

        tracing::info!(code = %gift.code, amount, "gift code issued");
        Ok(gift)
    }

    /// Create a code with a generated name.
    pub async fn issue_generated(&self, amount: u64) -> NstResult<GiftCode> {
        let mut last_conflict = None;
        for _ in 0..GENERATE_ATTEMPTS {
            match self.issue(&generate_code(), amount).await {
                Err(e @ NstError::Storage(StorageError::Conflict { .. })) => {
                    tracing::debug!(error = %e, "generated code taken, retrying");
                    last_conflict = Some(e);
                }
                other => return other,
            }
        }
        Err(last_conflict.unwrap_or_else(|| {
            StorageError::Conflict {
                path: CODES_PREFIX.to_string(),
            }
            .into()
        }))
    }

    /// Issue `count` generated codes, stopping at the first failure that is
    /// not a name clash.
    pub async fn issue_batch(&self, count: usize, amount: u64) -> NstResult<Vec<GiftCode>> {
        let mut issued = Vec::with_capacity(count);
        for _ in 0..count {
            issued.push(self.issue_generated(amount).await?);
        }
        Ok(issued)
    }
}
