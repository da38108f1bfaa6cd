use super::*;
use reqwest::{Method, Response, StatusCode};
use serde::de::DeserializeOwned;

const ERROR_BODY_PREVIEW: usize = 200;

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub(crate) struct BookSummary {
    pub(crate) id: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) authors: Vec<String>,
    #[serde(default)]
    pub(crate) link: Option<String>,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub(crate) struct ShelfSummary {
    pub(crate) name: String,
    #[serde(default)]
    pub(crate) show_name: Option<String>,
    #[serde(default)]
    pub(crate) book_count: u32,
}

impl ShelfSummary {
    pub(crate) fn label(&self) -> &str {
        self.show_name.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub(crate) struct BookDetail {
    pub(crate) id: String,
    pub(crate) title: String,
    #[serde(default)]
    pub(crate) authors: Vec<String>,
    #[serde(default)]
    pub(crate) description: Option<String>,
    #[serde(default)]
    pub(crate) average_rating: Option<String>,
    #[serde(default)]
    pub(crate) link: Option<String>,
    /// Shelf the authorized user keeps this book on, if any.
    #[serde(default)]
    pub(crate) shelf: Option<String>,
}

/// The remote bibliographic catalog. Every call reports invalid credentials
/// as `Unauthorized` and anything else as `RemoteService`.
#[async_trait]
pub(crate) trait CatalogApi: Send + Sync {
    async fn search(
        &self,
        session: &CatalogSession,
        query: &str,
        page: u32,
    ) -> Result<Vec<BookSummary>, BotError>;

    async fn list_shelves(&self, session: &CatalogSession) -> Result<Vec<ShelfSummary>, BotError>;

    async fn list_books(
        &self,
        session: &CatalogSession,
        shelf: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<BookSummary>, BotError>;

    async fn get_book(&self, session: &CatalogSession, book_id: &str) -> Result<BookDetail, BotError>;

    /// Returns the confirmation text to show the user.
    async fn mutate_shelf(
        &self,
        session: &CatalogSession,
        shelf: &str,
        book_id: &str,
        remove: bool,
    ) -> Result<String, BotError>;

    async fn who_am_i(&self, access: &AccessToken) -> Result<String, BotError>;
}

#[derive(Deserialize)]
struct BooksResponse {
    #[serde(default)]
    books: Vec<BookSummary>,
}

#[derive(Deserialize)]
struct ShelvesResponse {
    #[serde(default)]
    shelves: Vec<ShelfSummary>,
}

#[derive(Deserialize)]
struct BookResponse {
    book: BookDetail,
}

#[derive(Deserialize)]
struct AuthUserResponse {
    user: AuthUser,
}

#[derive(Deserialize)]
struct AuthUser {
    id: String,
}

#[derive(Deserialize)]
struct ShelfChangeResponse {
    #[serde(default)]
    message: Option<String>,
}

/// OAuth 1.0a signed client for the catalog HTTP API. Serves both as the
/// OAuth provider and as the catalog.
pub(crate) struct HttpCatalog {
    client: reqwest::Client,
    base_url: String,
    consumer_key: String,
    consumer_secret: String,
}

impl HttpCatalog {
    pub(crate) fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("build http client")?;
        Ok(HttpCatalog {
            client,
            base_url: config.api_base_url.trim_end_matches('/').to_string(),
            consumer_key: config.consumer_key.clone(),
            consumer_secret: config.consumer_secret.clone(),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    async fn signed(
        &self,
        method: Method,
        path: &str,
        params: Vec<(String, String)>,
        token: Option<(&str, &str)>,
    ) -> Result<Response, BotError> {
        let url = self.endpoint(path);
        let signer = Signer {
            consumer_key: &self.consumer_key,
            consumer_secret: &self.consumer_secret,
            token,
        };
        let header = signer
            .authorization_header(method.as_str(), &url, &params, &nonce(), now_ts())
            .map_err(|err| BotError::RemoteService(format!("sign {}: {:#}", path, err)))?;

        let request = self
            .client
            .request(method.clone(), &url)
            .header(reqwest::header::AUTHORIZATION, header);
        let request = if method == Method::GET {
            request.query(&params)
        } else {
            request.form(&params)
        };
        let response = request
            .send()
            .await
            .map_err(|err| BotError::RemoteService(format!("{} {}: {}", method, path, err)))?;
        check_status(path, response).await
    }

    async fn session_json<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        params: Vec<(String, String)>,
        session: &CatalogSession,
    ) -> Result<T, BotError> {
        let token = (session.access.token.as_str(), session.access.secret.as_str());
        let response = self.signed(method, path, params, Some(token)).await?;
        decode_json(path, response).await
    }
}

#[async_trait]
impl OAuthProvider for HttpCatalog {
    async fn get_request_token(&self) -> Result<RequestToken, BotError> {
        let response = self
            .signed(Method::POST, "oauth/request_token", Vec::new(), None)
            .await?;
        let body = read_body("oauth/request_token", response).await?;
        let (token, secret) = parse_token_response(&body).ok_or_else(|| {
            BotError::RemoteService("request token response without token pair".to_string())
        })?;
        Ok(RequestToken { token, secret })
    }

    fn authorize_url(&self, token: &RequestToken) -> String {
        format!(
            "{}?oauth_token={}",
            self.endpoint("oauth/authorize"),
            oauth_encode(&token.token)
        )
    }

    async fn get_access_token(&self, request: &RequestToken) -> Result<AccessToken, BotError> {
        let pair = (request.token.as_str(), request.secret.as_str());
        let response = match self
            .signed(Method::POST, "oauth/access_token", Vec::new(), Some(pair))
            .await
        {
            Ok(response) => response,
            Err(BotError::Unauthorized) => {
                return Err(BotError::HandshakeRejected(
                    "request token not authorized".to_string(),
                ))
            }
            Err(err) => return Err(err),
        };
        let body = read_body("oauth/access_token", response).await?;
        let (token, secret) = parse_token_response(&body).ok_or_else(|| {
            BotError::HandshakeRejected("access token response without token pair".to_string())
        })?;
        Ok(AccessToken { token, secret })
    }
}

#[async_trait]
impl CatalogApi for HttpCatalog {
    async fn search(
        &self,
        session: &CatalogSession,
        query: &str,
        page: u32,
    ) -> Result<Vec<BookSummary>, BotError> {
        let params = vec![
            ("q".to_string(), query.to_string()),
            ("page".to_string(), page.to_string()),
        ];
        let response: BooksResponse = self
            .session_json(Method::GET, "search/index.json", params, session)
            .await?;
        Ok(response.books)
    }

    async fn list_shelves(&self, session: &CatalogSession) -> Result<Vec<ShelfSummary>, BotError> {
        let params = vec![("user_id".to_string(), session.remote_account_id.clone())];
        let response: ShelvesResponse = self
            .session_json(Method::GET, "shelf/list.json", params, session)
            .await?;
        Ok(response.shelves)
    }

    async fn list_books(
        &self,
        session: &CatalogSession,
        shelf: &str,
        page: u32,
        page_size: usize,
    ) -> Result<Vec<BookSummary>, BotError> {
        let path = format!("review/list/{}.json", oauth_encode(&session.remote_account_id));
        let params = vec![
            ("shelf".to_string(), shelf.to_string()),
            ("page".to_string(), page.to_string()),
            ("per_page".to_string(), page_size.to_string()),
        ];
        let response: BooksResponse = self
            .session_json(Method::GET, &path, params, session)
            .await?;
        Ok(response.books)
    }

    async fn get_book(&self, session: &CatalogSession, book_id: &str) -> Result<BookDetail, BotError> {
        let path = format!("book/show/{}.json", oauth_encode(book_id));
        let response: BookResponse = self
            .session_json(Method::GET, &path, Vec::new(), session)
            .await?;
        Ok(response.book)
    }

    async fn mutate_shelf(
        &self,
        session: &CatalogSession,
        shelf: &str,
        book_id: &str,
        remove: bool,
    ) -> Result<String, BotError> {
        let mut params = vec![
            ("name".to_string(), shelf.to_string()),
            ("book_id".to_string(), book_id.to_string()),
        ];
        if remove {
            params.push(("a".to_string(), "remove".to_string()));
        }
        let response: ShelfChangeResponse = self
            .session_json(Method::POST, "shelf/add_to_shelf.json", params, session)
            .await?;
        Ok(response.message.unwrap_or_else(|| {
            if remove {
                format!("Removed from \"{}\"", shelf)
            } else {
                format!("Added to \"{}\"", shelf)
            }
        }))
    }

    async fn who_am_i(&self, access: &AccessToken) -> Result<String, BotError> {
        let pair = (access.token.as_str(), access.secret.as_str());
        let response = self
            .signed(Method::GET, "api/auth_user.json", Vec::new(), Some(pair))
            .await?;
        let response: AuthUserResponse = decode_json("api/auth_user.json", response).await?;
        Ok(response.user.id)
    }
}

async fn check_status(path: &str, response: Response) -> Result<Response, BotError> {
    let status = response.status();
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Err(BotError::Unauthorized);
    }
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(BotError::RemoteService(format!(
            "{} returned {}: {}",
            path,
            status,
            preview(&body)
        )));
    }
    Ok(response)
}

async fn read_body(path: &str, response: Response) -> Result<String, BotError> {
    response
        .text()
        .await
        .map_err(|err| BotError::RemoteService(format!("read {}: {}", path, err)))
}

async fn decode_json<T: DeserializeOwned>(path: &str, response: Response) -> Result<T, BotError> {
    let body = read_body(path, response).await?;
    serde_json::from_str(&body).map_err(|err| {
        BotError::RemoteService(format!("decode {}: {} in {}", path, err, preview(&body)))
    })
}

fn preview(body: &str) -> String {
    body.chars().take(ERROR_BODY_PREVIEW).collect()
}
