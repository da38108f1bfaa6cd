use super::*;
use regex::Regex;
use std::sync::OnceLock;

pub(crate) const HELP_TEXT: &str = "This bot is a pocket client for your Goodreads shelves.\n\
Start with /authorize, open the link, allow access and press \"Done!\".\n\
Send a title or an author name to search.\n\
Use /shelves to browse your shelves and /books <shelf> to open one.\n\
Tap /book_<id> under a search result to move the book between shelves.";
const UNKNOWN_COMMAND_TEXT: &str = "Unknown command. See /help.";
const EMPTY_QUERY_TEXT: &str = "Send a title or an author name to search.";
const BAD_BOOK_TEXT: &str = "Unknown book. Use the /book_<id> links from search results.";
const NOTHING_FOUND_TEXT: &str = "Nothing found!";
const NOTHING_MORE_TEXT: &str = "Nothing more here.";
const NO_SHELVES_TEXT: &str = "You have no shelves yet.";
const CHOOSE_SHELF_TEXT: &str = "Choose a shelf";
const PREV_LABEL: &str = "⬅️";
const NEXT_LABEL: &str = "➡️";
const SHELVES_LABEL: &str = "Shelves";
const DONE_LABEL: &str = "Done!";
const CURRENT_SHELF_MARK: &str = "✔️";
const REMOVE_LABEL: &str = "🗑";
const MAX_DESCRIPTION_CHARS: usize = 3000;

/// What the transport should do in answer to one event.
#[derive(Clone, Debug)]
pub(crate) enum Reply {
    /// New message in the chat.
    Text {
        text: String,
        markup: Option<InlineKeyboardMarkup>,
    },
    /// Edit the message whose button was pressed.
    Edit {
        text: Option<String>,
        markup: Option<InlineKeyboardMarkup>,
    },
    /// Callback acknowledgement, shown as a toast when it has text.
    Answer { text: Option<String> },
}

impl Reply {
    pub(crate) fn text(text: impl Into<String>) -> Self {
        Reply::Text {
            text: text.into(),
            markup: None,
        }
    }
}

/// Commands answer with a new message, button presses edit theirs in place.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
    Send,
    Edit,
}

impl Delivery {
    fn of(event: &Event) -> Self {
        match event {
            Event::Text { .. } => Delivery::Send,
            Event::Callback { .. } => Delivery::Edit,
        }
    }

    fn view(self, text: String, markup: Option<InlineKeyboardMarkup>) -> Reply {
        match self {
            Delivery::Send => Reply::Text { text, markup },
            Delivery::Edit => Reply::Edit {
                text: Some(text),
                markup,
            },
        }
    }
}

#[derive(Clone, Debug)]
pub(crate) struct ViewSettings {
    pub(crate) search_page_size: usize,
    pub(crate) books_page_size: usize,
    pub(crate) default_shelf: String,
}

impl ViewSettings {
    pub(crate) fn from_config(config: &Config) -> Self {
        ViewSettings {
            search_page_size: config.search_page_size,
            books_page_size: config.books_page_size,
            default_shelf: config.default_shelf.clone(),
        }
    }
}

/// Entry point for every chat event.
pub(crate) struct Interactions {
    store: Arc<dyn CredentialStore>,
    catalog: Arc<dyn CatalogApi>,
    handshake: HandshakeCoordinator,
    router: Router,
    settings: ViewSettings,
}

impl Interactions {
    pub(crate) fn new(
        store: Arc<dyn CredentialStore>,
        provider: Arc<dyn OAuthProvider>,
        catalog: Arc<dyn CatalogApi>,
        router: Router,
        settings: ViewSettings,
    ) -> Self {
        let handshake = HandshakeCoordinator::new(store.clone(), provider, catalog.clone());
        Interactions {
            store,
            catalog,
            handshake,
            router,
            settings,
        }
    }

    /// Never fails: errors become replies to the user who caused them.
    pub(crate) async fn handle(&self, event: Event) -> Vec<Reply> {
        let user_id = event.user_id();
        let is_callback = matches!(event, Event::Callback { .. });
        match self.dispatch(&event).await {
            Ok(replies) => replies,
            Err(err) => {
                match &err {
                    BotError::MalformedToken(_) => warn!("user_id {}: {}", user_id, err),
                    _ => error!("user_id {}: {}", user_id, err),
                }
                if is_callback && err.is_handshake_failure() {
                    vec![Reply::Answer {
                        text: Some(err.user_message().to_string()),
                    }]
                } else if is_callback {
                    vec![Reply::text(err.user_message()), Reply::Answer { text: None }]
                } else {
                    vec![Reply::text(err.user_message())]
                }
            }
        }
    }

    async fn dispatch(&self, event: &Event) -> Result<Vec<Reply>, BotError> {
        let user_id = event.user_id();
        let delivery = Delivery::of(event);
        let Some(route) = self.router.route(event) else {
            return match event {
                Event::Text { .. } => Ok(vec![Reply::text(UNKNOWN_COMMAND_TEXT)]),
                Event::Callback { token, .. } => Err(BotError::MalformedToken(format!(
                    "no handler for {:?}",
                    token
                ))),
            };
        };

        match event {
            Event::Text { text, .. } => {
                info!("user_id: {}, message: {}", user_id, text);
                match route {
                    Route::Help => Ok(vec![Reply::text(HELP_TEXT)]),
                    Route::Authorize => self.authorize(user_id).await,
                    Route::SearchBooks => {
                        let query = if parse_command(text).is_some() {
                            command_argument(text)
                        } else {
                            text.trim()
                        };
                        if query.is_empty() {
                            return Ok(vec![Reply::text(EMPTY_QUERY_TEXT)]);
                        }
                        self.search_books(user_id, 1, query, delivery).await
                    }
                    Route::Shelves => self.shelves(user_id, delivery).await,
                    Route::Books => {
                        let shelf = match command_argument(text) {
                            "" => self.settings.default_shelf.clone(),
                            shelf => shelf.to_string(),
                        };
                        self.books(user_id, &shelf, 1, delivery).await
                    }
                    Route::Book => {
                        let book_id = parse_command(text)
                            .and_then(|cmd| cmd.strip_prefix("book_"))
                            .unwrap_or("");
                        if book_id.is_empty() || !book_id.chars().all(|c| c.is_ascii_digit()) {
                            return Ok(vec![Reply::text(BAD_BOOK_TEXT)]);
                        }
                        self.book(user_id, book_id).await
                    }
                    Route::CheckAuth | Route::ShelfChange => {
                        Ok(vec![Reply::text(UNKNOWN_COMMAND_TEXT)])
                    }
                }
            }
            Event::Callback { token, .. } => {
                info!("user_id: {}, callback: {}", user_id, token);
                match (route, Intent::decode(token)?) {
                    (Route::CheckAuth, Intent::CheckAuth) => self.check_auth(user_id).await,
                    (Route::SearchBooks, Intent::SearchBooks { page, query }) => {
                        self.search_books(user_id, page, &query, delivery).await
                    }
                    (Route::Shelves, Intent::Shelves) => self.shelves(user_id, delivery).await,
                    (Route::Books, Intent::Books { shelf, page }) => {
                        self.books(user_id, &shelf, page, delivery).await
                    }
                    (Route::ShelfChange, Intent::AddToShelf { shelf, book_id }) => {
                        self.change_shelf(user_id, &shelf, &book_id, false).await
                    }
                    (Route::ShelfChange, Intent::RmFromShelf { shelf, book_id }) => {
                        self.change_shelf(user_id, &shelf, &book_id, true).await
                    }
                    (route, intent) => Err(BotError::MalformedToken(format!(
                        "{:?} routed to {:?}",
                        intent.operation(),
                        route
                    ))),
                }
            }
        }
    }

    async fn authorize(&self, user_id: u64) -> Result<Vec<Reply>, BotError> {
        match self.handshake.begin(user_id).await? {
            BeginOutcome::Pending { authorize_url } => {
                info!("authorize, sending url to user_id {}", user_id);
                let markup = intent_button(DONE_LABEL, Intent::CheckAuth)
                    .map(|button| InlineKeyboardMarkup::new(vec![vec![button]]));
                Ok(vec![Reply::Text {
                    text: format!("To authorize the bot open the link: {}", authorize_url),
                    markup,
                }])
            }
            BeginOutcome::AlreadyAuthorized { remote_account_id } => Ok(vec![Reply::text(
                format!("Already authorized: {}", remote_account_id),
            )]),
        }
    }

    async fn check_auth(&self, user_id: u64) -> Result<Vec<Reply>, BotError> {
        let remote_account_id = self.handshake.confirm(user_id).await?;
        Ok(vec![Reply::Edit {
            text: Some(format!("Authorized: {}", remote_account_id)),
            markup: None,
        }])
    }

    async fn search_books(
        &self,
        user_id: u64,
        page: u32,
        query: &str,
        delivery: Delivery,
    ) -> Result<Vec<Reply>, BotError> {
        info!("user_id: {}, search_query: {}, page: {}", user_id, query, page);
        let session = resolve(self.store.as_ref(), user_id).await?;
        let mut books = self.catalog.search(&session, query, page).await?;
        books.truncate(self.settings.search_page_size);

        let text = if !books.is_empty() {
            render_book_list(&books)
        } else if page == 1 {
            NOTHING_FOUND_TEXT.to_string()
        } else {
            NOTHING_MORE_TEXT.to_string()
        };
        let nav = pagination_row(page, !books.is_empty(), |page| Intent::SearchBooks {
            page,
            query: query.to_string(),
        });
        let markup = (!nav.is_empty()).then(|| InlineKeyboardMarkup::new(vec![nav]));
        Ok(vec![delivery.view(text, markup)])
    }

    async fn shelves(&self, user_id: u64, delivery: Delivery) -> Result<Vec<Reply>, BotError> {
        info!("user_id: {}, shelves", user_id);
        let session = resolve(self.store.as_ref(), user_id).await?;
        let shelves = self.catalog.list_shelves(&session).await?;
        if shelves.is_empty() {
            return Ok(vec![delivery.view(NO_SHELVES_TEXT.to_string(), None)]);
        }
        Ok(vec![delivery.view(
            CHOOSE_SHELF_TEXT.to_string(),
            Some(build_shelves_keyboard(&shelves)),
        )])
    }

    async fn books(
        &self,
        user_id: u64,
        shelf: &str,
        page: u32,
        delivery: Delivery,
    ) -> Result<Vec<Reply>, BotError> {
        info!("user_id: {}, shelf: {}, page: {}", user_id, shelf, page);
        let page_size = self.settings.books_page_size;
        let session = resolve(self.store.as_ref(), user_id).await?;
        let mut books = self
            .catalog
            .list_books(&session, shelf, page, page_size)
            .await?;
        let has_more = books.len() >= page_size;
        books.truncate(page_size);

        let text = if books.is_empty() {
            NOTHING_MORE_TEXT.to_string()
        } else {
            render_book_list(&books)
        };
        let nav = pagination_row(page, has_more, |page| Intent::Books {
            shelf: shelf.to_string(),
            page,
        });
        let mut rows = Vec::new();
        if !nav.is_empty() {
            rows.push(nav);
        }
        rows.extend(intent_button(SHELVES_LABEL, Intent::Shelves).map(|button| vec![button]));
        Ok(vec![delivery.view(text, Some(InlineKeyboardMarkup::new(rows)))])
    }

    async fn book(&self, user_id: u64, book_id: &str) -> Result<Vec<Reply>, BotError> {
        info!("user_id: {}, book_id: {}", user_id, book_id);
        let session = resolve(self.store.as_ref(), user_id).await?;
        let book = self.catalog.get_book(&session, book_id).await?;
        let shelves = self.catalog.list_shelves(&session).await?;
        let markup = build_book_keyboard(&shelves, book.shelf.as_deref(), book_id);
        Ok(vec![Reply::Text {
            text: render_book_detail(&book),
            markup: Some(markup),
        }])
    }

    async fn change_shelf(
        &self,
        user_id: u64,
        shelf: &str,
        book_id: &str,
        remove: bool,
    ) -> Result<Vec<Reply>, BotError> {
        info!(
            "user_id: {}, shelf: {}, book_id: {}, remove: {}",
            user_id, shelf, book_id, remove
        );
        let session = resolve(self.store.as_ref(), user_id).await?;
        let confirmation = self
            .catalog
            .mutate_shelf(&session, shelf, book_id, remove)
            .await?;
        let current = if remove { None } else { Some(shelf) };
        let shelves = self.catalog.list_shelves(&session).await?;
        Ok(vec![
            Reply::Answer {
                text: Some(confirmation),
            },
            Reply::Edit {
                text: None,
                markup: Some(build_book_keyboard(&shelves, current, book_id)),
            },
        ])
    }
}

/// `None` when the intent cannot be carried by a button, e.g. a shelf name
/// too long for the payload limit. The rest of the keyboard still goes out.
pub(crate) fn intent_button(
    label: impl Into<String>,
    intent: Intent,
) -> Option<InlineKeyboardButton> {
    match intent.fit_to_payload().encode() {
        Ok(token) => Some(InlineKeyboardButton::callback(label.into(), token)),
        Err(err) => {
            warn!("dropping button: {}", err);
            None
        }
    }
}

/// "Previous" iff `page > 1`, "next" iff more results are likely.
pub(crate) fn pagination_row(
    page: u32,
    has_more: bool,
    intent_for: impl Fn(u32) -> Intent,
) -> Vec<InlineKeyboardButton> {
    let mut row = Vec::new();
    if page > 1 {
        row.extend(intent_button(PREV_LABEL, intent_for(page - 1)));
    }
    if has_more {
        row.extend(intent_button(NEXT_LABEL, intent_for(page + 1)));
    }
    row
}

pub(crate) fn build_shelves_keyboard(shelves: &[ShelfSummary]) -> InlineKeyboardMarkup {
    let rows = shelves
        .iter()
        .filter_map(|shelf| {
            intent_button(
                format!("{} ({})", shelf.label(), shelf.book_count),
                Intent::Books {
                    shelf: shelf.name.clone(),
                    page: 1,
                },
            )
            .map(|button| vec![button])
        })
        .collect::<Vec<_>>();
    InlineKeyboardMarkup::new(rows)
}

/// One button per shelf with the current one marked, plus a remove button
/// when the book sits on a shelf.
pub(crate) fn build_book_keyboard(
    shelves: &[ShelfSummary],
    current: Option<&str>,
    book_id: &str,
) -> InlineKeyboardMarkup {
    let mut rows = Vec::new();
    for shelf in shelves {
        let label = if current == Some(shelf.name.as_str()) {
            format!("{}{}", CURRENT_SHELF_MARK, shelf.label())
        } else {
            shelf.label().to_string()
        };
        let intent = Intent::AddToShelf {
            shelf: shelf.name.clone(),
            book_id: book_id.to_string(),
        };
        rows.extend(intent_button(label, intent).map(|button| vec![button]));
    }
    if let Some(current) = current {
        let intent = Intent::RmFromShelf {
            shelf: current.to_string(),
            book_id: book_id.to_string(),
        };
        rows.extend(intent_button(REMOVE_LABEL, intent).map(|button| vec![button]));
    }
    InlineKeyboardMarkup::new(rows)
}

pub(crate) fn render_book_list(books: &[BookSummary]) -> String {
    books
        .iter()
        .map(|book| {
            let mut entry = strip_tags(&book.title);
            if let Some(link) = &book.link {
                entry.push_str(&format!(" → {}", link));
            }
            if !book.authors.is_empty() {
                entry.push('\n');
                entry.push_str(&book.authors.join(", "));
            }
            entry.push_str(&format!("\n/book_{}", book.id));
            entry
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub(crate) fn render_book_detail(book: &BookDetail) -> String {
    let mut lines = vec![strip_tags(&book.title)];
    if !book.authors.is_empty() {
        lines.push(book.authors.join(", "));
    }
    if let Some(rating) = &book.average_rating {
        lines.push(format!("Rating: {}", rating));
    }
    if let Some(description) = book.description.as_deref().map(strip_tags) {
        if !description.trim().is_empty() {
            lines.push(String::new());
            lines.push(truncate_chars(description.trim(), MAX_DESCRIPTION_CHARS));
        }
    }
    if let Some(link) = &book.link {
        lines.push(String::new());
        lines.push(link.clone());
    }
    lines.join("\n")
}

pub(crate) fn strip_tags(text: &str) -> String {
    static TAG: OnceLock<Regex> = OnceLock::new();
    let tag = TAG.get_or_init(|| Regex::new(r"<[^>]*>").expect("tag pattern compiles"));
    tag.replace_all(text, "").into_owned()
}

fn truncate_chars(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text.to_string(),
    }
}
