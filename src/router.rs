use super::*;

/// An inbound chat event, already stripped of transport details.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Event {
    Text { user_id: u64, text: String },
    Callback { user_id: u64, token: String },
}

impl Event {
    pub(crate) fn user_id(&self) -> u64 {
        match self {
            Event::Text { user_id, .. } | Event::Callback { user_id, .. } => *user_id,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Trigger {
    /// `/name`, optionally followed by arguments.
    Command(&'static str),
    /// `/prefix<argument>`, e.g. `/book_42`.
    CommandPrefix(&'static str),
    /// Callback token whose first field names the operation.
    Callback(Operation),
    /// Any text that is not a command.
    FreeText,
}

impl Trigger {
    fn matches(&self, event: &Event) -> bool {
        match (self, event) {
            (Trigger::Command(name), Event::Text { text, .. }) => parse_command(text) == Some(*name),
            (Trigger::CommandPrefix(prefix), Event::Text { text, .. }) => parse_command(text)
                .and_then(|cmd| cmd.strip_prefix(*prefix))
                .map_or(false, |arg| !arg.is_empty()),
            (Trigger::Callback(operation), Event::Callback { token, .. }) => {
                codec::operation_of(token) == Some(*operation)
            }
            (Trigger::FreeText, Event::Text { text, .. }) => !text.trim_start().starts_with('/'),
            _ => false,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Route {
    Help,
    Authorize,
    CheckAuth,
    SearchBooks,
    Shelves,
    Books,
    Book,
    ShelfChange,
}

/// Ordered `(trigger, route)` table; the first matching trigger wins.
#[derive(Clone, Debug)]
pub(crate) struct Router {
    table: Vec<(Trigger, Route)>,
}

impl Router {
    pub(crate) fn new(table: Vec<(Trigger, Route)>) -> Self {
        Router { table }
    }

    pub(crate) fn route(&self, event: &Event) -> Option<Route> {
        self.table
            .iter()
            .find(|(trigger, _)| trigger.matches(event))
            .map(|(_, route)| *route)
    }
}

impl Default for Router {
    fn default() -> Self {
        Router::new(vec![
            (Trigger::Command("start"), Route::Help),
            (Trigger::Command("help"), Route::Help),
            (Trigger::Command("authorize"), Route::Authorize),
            (Trigger::Callback(Operation::CheckAuth), Route::CheckAuth),
            (Trigger::Command("search_books"), Route::SearchBooks),
            (Trigger::Callback(Operation::SearchBooks), Route::SearchBooks),
            (Trigger::Command("shelves"), Route::Shelves),
            (Trigger::Callback(Operation::Shelves), Route::Shelves),
            (Trigger::Command("books"), Route::Books),
            (Trigger::Callback(Operation::Books), Route::Books),
            (Trigger::CommandPrefix("book_"), Route::Book),
            (Trigger::Callback(Operation::AddToShelf), Route::ShelfChange),
            (Trigger::Callback(Operation::RmFromShelf), Route::ShelfChange),
            (Trigger::FreeText, Route::SearchBooks),
        ])
    }
}

pub(crate) fn parse_command(text: &str) -> Option<&str> {
    let first = text.split_whitespace().next()?;
    if !first.starts_with('/') {
        return None;
    }
    let cmd = first.trim_start_matches('/');
    Some(cmd.split('@').next().unwrap_or(cmd))
}

/// Text after the command word, trimmed.
pub(crate) fn command_argument(text: &str) -> &str {
    text.trim_start()
        .splitn(2, |c: char| c.is_whitespace())
        .nth(1)
        .unwrap_or("")
        .trim()
}
