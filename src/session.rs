use super::*;

/// Authenticated handle for catalog calls. Built per event, never stored.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct CatalogSession {
    pub(crate) access: AccessToken,
    pub(crate) remote_account_id: String,
}

pub(crate) async fn resolve(
    store: &dyn CredentialStore,
    user_id: u64,
) -> Result<CatalogSession, BotError> {
    let access = store
        .get_tokens(user_id)
        .await?
        .and_then(|record| record.access)
        .ok_or(BotError::Unauthorized)?;
    Ok(CatalogSession {
        access: access.access_token(),
        remote_account_id: access.remote_account_id,
    })
}
