//! User record sync between the device and the document store.

use chrono::Utc;
use nst_core::{
    NstError, NstResult, StorageError, TestResult, User, CURRENT_USER_KEY, USERS_COLLECTION,
};
use nst_storage::DocumentWrite;
use serde_json::Value;

use crate::context::StoreContext;

pub struct UserSync {
    ctx: StoreContext,
}

impl UserSync {
    pub fn new(ctx: StoreContext) -> Self {
        Self { ctx }
    }

    /// Merge the whole user record into the store, stamping `lastSeen` and a
    /// server-side `updatedAt`, and mirror it locally.
    pub async fn save_user(&self, user: &User) -> NstResult<()> {
        let value = serde_json::to_value(user)?;
        self.ctx.mirror_local(CURRENT_USER_KEY, &value);

        let mut write = DocumentWrite::from_value(value);
        write.fields.remove("updatedAt");
        let write = write
            .set("lastSeen", Utc::now().to_rfc3339())
            .server_timestamp("updatedAt");
        self.ctx
            .remote(
                "set_doc",
                self.ctx.documents().set_doc(USERS_COLLECTION, &user.id, write, true),
            )
            .await
            .inspect_err(|e| tracing::warn!(user_id = %user.id, error = %e, "user sync failed"))
    }

    /// Record today's active time.
    pub async fn update_status(&self, user_id: &str, active_seconds: u64) -> NstResult<()> {
        let write = DocumentWrite::new()
            .set("lastSeen", Utc::now().to_rfc3339())
            .set("dailyActiveSeconds", active_seconds);
        self.ctx
            .remote(
                "set_doc",
                self.ctx.documents().set_doc(USERS_COLLECTION, user_id, write, true),
            )
            .await
            .inspect_err(|e| tracing::warn!(user_id, error = %e, "status update failed"))
    }

    /// Append a test result to the user's `testHistory`.
    ///
    /// Falls back to a merge write when the user document does not exist yet.
    pub async fn save_test_result(&self, user_id: &str, result: &TestResult) -> NstResult<()> {
        let entry = serde_json::to_value(result)?;
        let write = DocumentWrite::new()
            .set("lastTestTaken", Utc::now().to_rfc3339())
            .array_union("testHistory", vec![entry]);

        let updated = self
            .ctx
            .remote(
                "update_doc",
                self.ctx
                    .documents()
                    .update_doc(USERS_COLLECTION, user_id, write.clone()),
            )
            .await;
        match updated {
            Ok(()) => Ok(()),
            Err(NstError::Storage(StorageError::DocumentNotFound { .. })) => {
                tracing::debug!(user_id, "no user document yet, creating it");
                self.ctx
                    .remote(
                        "set_doc",
                        self.ctx.documents().set_doc(USERS_COLLECTION, user_id, write, true),
                    )
                    .await
            }
            Err(e) => {
                tracing::warn!(user_id, test_id = %result.test_id, error = %e, "test result sync failed");
                Err(e)
            }
        }
    }

    /// The signed-in user from the local mirror.
    pub fn current_user(&self) -> NstResult<Option<User>> {
        let Some(entry) = self.ctx.local().get(CURRENT_USER_KEY)? else {
            return Ok(None);
        };
        match serde_json::from_value::<User>(entry.value) {
            Ok(user) => Ok(Some(user)),
            Err(e) => {
                tracing::warn!(error = %e, "discarding unreadable local user");
                Ok(None)
            }
        }
    }

    /// Forget the signed-in user on this device.
    pub fn sign_out(&self) -> NstResult<bool> {
        self.ctx.local().remove(CURRENT_USER_KEY)
    }

    /// Replace the local mirror with the remote record, when there is one.
    pub async fn refresh_current(&self, user_id: &str) -> NstResult<Option<User>> {
        let doc = self
            .ctx
            .remote("get_doc", self.ctx.documents().get_doc(USERS_COLLECTION, user_id))
            .await?;
        let Some(Value::Object(mut map)) = doc else {
            return Ok(None);
        };
        map.entry("id")
            .or_insert_with(|| Value::String(user_id.to_string()));
        let user: User = serde_json::from_value(Value::Object(map))?;
        self.ctx
            .mirror_local(CURRENT_USER_KEY, &serde_json::to_value(&user)?);
        Ok(Some(user))
    }
}
