use super::*;

/// Telegram rejects callback payloads longer than this many bytes.
pub(crate) const MAX_TOKEN_LEN: usize = 64;

const DELIMITER: char = ' ';

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Operation {
    SearchBooks,
    Shelves,
    Books,
    AddToShelf,
    RmFromShelf,
    CheckAuth,
}

impl Operation {
    pub(crate) const ALL: [Operation; 6] = [
        Operation::SearchBooks,
        Operation::Shelves,
        Operation::Books,
        Operation::AddToShelf,
        Operation::RmFromShelf,
        Operation::CheckAuth,
    ];

    pub(crate) fn name(self) -> &'static str {
        match self {
            Operation::SearchBooks => "search_books",
            Operation::Shelves => "shelves",
            Operation::Books => "books",
            Operation::AddToShelf => "add_to_shelf",
            Operation::RmFromShelf => "rm_from_shelf",
            Operation::CheckAuth => "check_auth",
        }
    }

    pub(crate) fn from_name(name: &str) -> Option<Self> {
        Operation::ALL.into_iter().find(|op| op.name() == name)
    }
}

/// Conversation state carried by an inline button.
///
/// Tokens are the operation name followed by space separated fields. Free
/// text (search queries, shelf names) always sits in the position that may
/// absorb delimiters: the tail for searches, everything before the trailing
/// field for shelf tokens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Intent {
    SearchBooks { page: u32, query: String },
    Shelves,
    Books { shelf: String, page: u32 },
    AddToShelf { shelf: String, book_id: String },
    RmFromShelf { shelf: String, book_id: String },
    CheckAuth,
}

impl Intent {
    pub(crate) fn operation(&self) -> Operation {
        match self {
            Intent::SearchBooks { .. } => Operation::SearchBooks,
            Intent::Shelves => Operation::Shelves,
            Intent::Books { .. } => Operation::Books,
            Intent::AddToShelf { .. } => Operation::AddToShelf,
            Intent::RmFromShelf { .. } => Operation::RmFromShelf,
            Intent::CheckAuth => Operation::CheckAuth,
        }
    }

    /// Fails for values `decode` could not give back unchanged: pages below
    /// one, empty shelves, book ids with a delimiter, or tokens longer than
    /// `MAX_TOKEN_LEN`.
    pub(crate) fn encode(&self) -> Result<String, BotError> {
        let name = self.operation().name();
        let token = match self {
            Intent::SearchBooks { page, query } => format!("{name} {page} {query}"),
            Intent::Books { shelf, page } => format!("{name} {shelf} {page}"),
            Intent::AddToShelf { shelf, book_id } | Intent::RmFromShelf { shelf, book_id } => {
                format!("{name} {shelf} {book_id}")
            }
            Intent::Shelves | Intent::CheckAuth => name.to_string(),
        };

        match self {
            Intent::SearchBooks { page, .. } if *page == 0 => {
                return Err(malformed(&token, "page must be a positive integer"))
            }
            Intent::Books { shelf, page } if *page == 0 || shelf.is_empty() => {
                return Err(malformed(&token, "empty shelf or zero page"))
            }
            Intent::AddToShelf { shelf, book_id } | Intent::RmFromShelf { shelf, book_id }
                if shelf.is_empty() || book_id.is_empty() || book_id.contains(DELIMITER) =>
            {
                return Err(malformed(&token, "empty shelf or bad book id"))
            }
            _ => {}
        }
        if token.len() > MAX_TOKEN_LEN {
            return Err(malformed(&token, "token does not fit a button"));
        }
        Ok(token)
    }

    pub(crate) fn decode(token: &str) -> Result<Self, BotError> {
        if token.len() > MAX_TOKEN_LEN {
            return Err(malformed(token, "token does not fit a button"));
        }
        let (name, rest) = match token.split_once(DELIMITER) {
            Some((name, rest)) => (name, Some(rest)),
            None => (token, None),
        };
        let operation = Operation::from_name(name)
            .ok_or_else(|| malformed(token, "unknown operation"))?;

        match (operation, rest) {
            (Operation::Shelves, None) => Ok(Intent::Shelves),
            (Operation::CheckAuth, None) => Ok(Intent::CheckAuth),
            (Operation::SearchBooks, Some(rest)) => {
                let (page, query) = rest
                    .split_once(DELIMITER)
                    .ok_or_else(|| malformed(token, "expected page and query"))?;
                Ok(Intent::SearchBooks {
                    page: parse_page(token, page)?,
                    query: query.to_string(),
                })
            }
            (Operation::Books, Some(rest)) => {
                let (shelf, page) = rest
                    .rsplit_once(DELIMITER)
                    .ok_or_else(|| malformed(token, "expected shelf and page"))?;
                if shelf.is_empty() {
                    return Err(malformed(token, "empty shelf"));
                }
                Ok(Intent::Books {
                    shelf: shelf.to_string(),
                    page: parse_page(token, page)?,
                })
            }
            (Operation::AddToShelf | Operation::RmFromShelf, Some(rest)) => {
                let (shelf, book_id) = rest
                    .rsplit_once(DELIMITER)
                    .ok_or_else(|| malformed(token, "expected shelf and book id"))?;
                if shelf.is_empty() || book_id.is_empty() {
                    return Err(malformed(token, "empty shelf or book id"));
                }
                let shelf = shelf.to_string();
                let book_id = book_id.to_string();
                if operation == Operation::AddToShelf {
                    Ok(Intent::AddToShelf { shelf, book_id })
                } else {
                    Ok(Intent::RmFromShelf { shelf, book_id })
                }
            }
            _ => Err(malformed(token, "wrong number of arguments")),
        }
    }

    /// Shortens a search query until the encoded token fits a button. Shelf
    /// names and book ids come from the catalog and are never cut.
    pub(crate) fn fit_to_payload(self) -> Self {
        match self {
            Intent::SearchBooks { page, query } => {
                let fixed = Operation::SearchBooks.name().len() + page.to_string().len() + 2;
                let budget = MAX_TOKEN_LEN.saturating_sub(fixed);
                let mut end = query.len().min(budget);
                while !query.is_char_boundary(end) {
                    end -= 1;
                }
                Intent::SearchBooks {
                    page,
                    query: query[..end].to_string(),
                }
            }
            other => other,
        }
    }
}

/// Operation named by the first field of a token, if it is a known one.
pub(crate) fn operation_of(token: &str) -> Option<Operation> {
    let name = token.split(DELIMITER).next().unwrap_or(token);
    Operation::from_name(name)
}

/// Only the canonical spelling: ASCII digits, no sign, no leading zero.
fn parse_page(token: &str, raw: &str) -> Result<u32, BotError> {
    if raw.is_empty() || raw.starts_with('0') || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return Err(malformed(token, "page must be a positive integer"));
    }
    match raw.parse::<u32>() {
        Ok(page) if page >= 1 => Ok(page),
        _ => Err(malformed(token, "page must be a positive integer")),
    }
}

fn malformed(token: &str, reason: &str) -> BotError {
    BotError::MalformedToken(format!("{reason} in {token:?}"))
}
