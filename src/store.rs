use super::*;

pub(crate) const CREDENTIALS_FILE: &str = "credentials.json";

/// OAuth material kept per chat user.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct CredentialRecord {
    pub(crate) request_token: String,
    pub(crate) request_token_secret: String,
    #[serde(default)]
    pub(crate) access: Option<AccessCredentials>,
    pub(crate) created_at: String,
}

/// Set once the user confirmed the handshake. Kept as one value so the
/// access fields can never be half written.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub(crate) struct AccessCredentials {
    pub(crate) access_token: String,
    pub(crate) access_token_secret: String,
    pub(crate) remote_account_id: String,
    pub(crate) authorized_at: String,
}

impl CredentialRecord {
    pub(crate) fn request_token(&self) -> RequestToken {
        RequestToken {
            token: self.request_token.clone(),
            secret: self.request_token_secret.clone(),
        }
    }
}

impl AccessCredentials {
    pub(crate) fn access_token(&self) -> AccessToken {
        AccessToken {
            token: self.access_token.clone(),
            secret: self.access_token_secret.clone(),
        }
    }
}

#[async_trait]
pub(crate) trait CredentialStore: Send + Sync {
    /// Inserts a fresh record holding only the request pair. Returns false
    /// and leaves the stored row alone when the user already has one.
    async fn upsert_request_token(&self, user_id: u64, token: &RequestToken) -> Result<bool>;

    async fn get_tokens(&self, user_id: u64) -> Result<Option<CredentialRecord>>;

    /// Last write wins.
    async fn set_access_credentials(
        &self,
        user_id: u64,
        access: &AccessToken,
        remote_account_id: &str,
    ) -> Result<()>;
}

/// Credential table persisted as a single JSON document.
pub(crate) struct JsonCredentialStore {
    path: PathBuf,
    records: Mutex<BTreeMap<u64, CredentialRecord>>,
}

impl JsonCredentialStore {
    pub(crate) fn open(path: PathBuf) -> Result<Self> {
        let records = load_records(&path)?;
        info!(
            "loaded {} credential records from {}",
            records.len(),
            path.display()
        );
        Ok(JsonCredentialStore {
            path,
            records: Mutex::new(records),
        })
    }
}

#[async_trait]
impl CredentialStore for JsonCredentialStore {
    async fn upsert_request_token(&self, user_id: u64, token: &RequestToken) -> Result<bool> {
        let mut records = self.records.lock().await;
        if records.contains_key(&user_id) {
            return Ok(false);
        }
        let mut updated = records.clone();
        updated.insert(
            user_id,
            CredentialRecord {
                request_token: token.token.clone(),
                request_token_secret: token.secret.clone(),
                access: None,
                created_at: now_rfc3339(),
            },
        );
        save_records(&self.path, &updated)?;
        *records = updated;
        Ok(true)
    }

    async fn get_tokens(&self, user_id: u64) -> Result<Option<CredentialRecord>> {
        Ok(self.records.lock().await.get(&user_id).cloned())
    }

    async fn set_access_credentials(
        &self,
        user_id: u64,
        access: &AccessToken,
        remote_account_id: &str,
    ) -> Result<()> {
        let mut records = self.records.lock().await;
        let mut updated = records.clone();
        let record = updated
            .get_mut(&user_id)
            .ok_or_else(|| anyhow!("no credential record for user {}", user_id))?;
        record.access = Some(AccessCredentials {
            access_token: access.token.clone(),
            access_token_secret: access.secret.clone(),
            remote_account_id: remote_account_id.to_string(),
            authorized_at: now_rfc3339(),
        });
        save_records(&self.path, &updated)?;
        *records = updated;
        Ok(())
    }
}

pub(crate) fn load_records(path: &Path) -> Result<BTreeMap<u64, CredentialRecord>> {
    if !path.exists() {
        return Ok(BTreeMap::new());
    }
    let data = fs::read_to_string(path)
        .with_context(|| format!("read credentials {}", path.display()))?;
    if data.trim().is_empty() {
        return Ok(BTreeMap::new());
    }
    let records = serde_json::from_str(&data).context("parse credentials")?;
    Ok(records)
}

fn save_records(path: &Path, records: &BTreeMap<u64, CredentialRecord>) -> Result<()> {
    let data = serde_json::to_vec_pretty(records).context("serialize credentials")?;
    atomic_write(path, &data)
}

fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    let dir = path
        .parent()
        .ok_or_else(|| anyhow!("no parent dir for {}", path.display()))?;
    fs::create_dir_all(dir).with_context(|| format!("create dir {}", dir.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    tmp.write_all(data).context("write temp file")?;
    tmp.flush().context("flush temp file")?;
    tmp.as_file_mut().sync_all().context("sync temp file")?;
    tmp.persist(path)
        .map_err(|e| anyhow!("persist temp file: {}", e))?;
    Ok(())
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}
