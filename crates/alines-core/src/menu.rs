//! Menu content, selection options and outcomes.

use crate::codec::{CodecError, MAX_ITEMS, MAX_TEXT_LEN, Response};
use crate::error::DisconnectReason;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors rejecting a menu before it is opened
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MenuError {
    /// More entries than the wire format can count
    #[error("too many entries: {0} (max 65535)")]
    TooManyEntries(usize),

    /// Title or entry longer than the wire format can frame
    #[error("{field} too long: {len} bytes (max 65535)")]
    TextTooLong {
        /// Which text field overflowed
        field: &'static str,
        /// Encoded length in bytes
        len: usize,
    },

    /// Preselected entry does not exist
    #[error("selected index {index} out of range ({len} entries)")]
    SelectedOutOfRange {
        /// Requested preselection
        index: usize,
        /// Number of entries
        len: usize,
    },

    /// Menu could not be encoded
    #[error(transparent)]
    Codec(#[from] CodecError),
}

/// Selection options sent along with a menu
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MenuOptions {
    /// Client may pick several entries (default: false)
    pub allow_multi: bool,
    /// Client may type a free-text answer (default: false)
    pub allow_custom: bool,
    /// Entry highlighted when the menu opens (default: none)
    pub selected_index: Option<usize>,
}

impl MenuOptions {
    /// Options with every default
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Allow multi selection
    #[must_use]
    pub fn with_multi(mut self) -> Self {
        self.allow_multi = true;
        self
    }

    /// Allow custom free-text entries
    #[must_use]
    pub fn with_custom(mut self) -> Self {
        self.allow_custom = true;
        self
    }

    /// Preselect an entry
    #[must_use]
    pub fn with_selected(mut self, index: usize) -> Self {
        self.selected_index = Some(index);
        self
    }
}

/// A titled, ordered list of selectable entries
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Menu {
    /// Menu title
    pub title: String,
    /// Entries, addressed by position
    pub entries: Vec<String>,
    /// Selection options
    pub options: MenuOptions,
}

impl Menu {
    /// Create a menu with default options
    pub fn new<T, I, E>(title: T, entries: I) -> Self
    where
        T: Into<String>,
        I: IntoIterator<Item = E>,
        E: Into<String>,
    {
        Self {
            title: title.into(),
            entries: entries.into_iter().map(Into::into).collect(),
            options: MenuOptions::default(),
        }
    }

    /// Replace the selection options
    #[must_use]
    pub fn with_options(mut self, options: MenuOptions) -> Self {
        self.options = options;
        self
    }

    /// Check that the menu fits the wire format.
    ///
    /// # Errors
    ///
    /// Returns [`MenuError`] describing the first field that does not fit.
    pub fn validate(&self) -> Result<(), MenuError> {
        if self.entries.len() > MAX_ITEMS {
            return Err(MenuError::TooManyEntries(self.entries.len()));
        }
        if self.title.len() > MAX_TEXT_LEN {
            return Err(MenuError::TextTooLong {
                field: "title",
                len: self.title.len(),
            });
        }
        if let Some(entry) = self.entries.iter().find(|e| e.len() > MAX_TEXT_LEN) {
            return Err(MenuError::TextTooLong {
                field: "entry",
                len: entry.len(),
            });
        }
        if let Some(index) = self.options.selected_index {
            if index >= self.entries.len() {
                return Err(MenuError::SelectedOutOfRange {
                    index,
                    len: self.entries.len(),
                });
            }
        }
        Ok(())
    }

    /// Look up an entry by position
    pub fn entry(&self, index: usize) -> Option<MenuEntry> {
        self.entries.get(index).map(|text| MenuEntry {
            index,
            text: text.clone(),
        })
    }

    fn entry_checked(&self, index: u16) -> Result<MenuEntry, DisconnectReason> {
        self.entry(usize::from(index))
            .ok_or(DisconnectReason::IndexOutOfRange {
                index,
                len: self.entries.len(),
            })
    }

    /// Turn a decoded client response into an outcome for this menu.
    ///
    /// # Errors
    ///
    /// Returns the protocol violation when the response references a missing
    /// entry or uses a selection mode the options do not allow.
    pub fn resolve(&self, response: &Response) -> Result<Selection, DisconnectReason> {
        match response {
            Response::NoSelection => Ok(Selection::NoSelection),
            Response::Single(index) => self.entry_checked(*index).map(Selection::Single),
            Response::Multiple(indices) => {
                if !self.options.allow_multi {
                    return Err(DisconnectReason::MultiNotAllowed);
                }
                indices
                    .iter()
                    .map(|&index| self.entry_checked(index))
                    .collect::<Result<Vec<_>, _>>()
                    .map(Selection::Multiple)
            }
            Response::Custom(text) => {
                if !self.options.allow_custom {
                    return Err(DisconnectReason::CustomNotAllowed);
                }
                Ok(Selection::Custom(text.clone()))
            }
        }
    }
}

/// One entry of a menu, referenced by its original position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MenuEntry {
    /// Position in the menu's entry list
    pub index: usize,
    /// Entry text
    pub text: String,
}

/// Outcome of a menu
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// Closed without a choice, cancelled by the caller, or superseded
    NoSelection,
    /// One entry picked
    Single(MenuEntry),
    /// Several entries picked, in the order the client sent them
    Multiple(Vec<MenuEntry>),
    /// Free text typed by the client
    Custom(String),
    /// Server shut down while the menu was open
    Cancelled,
}

impl Selection {
    /// Whether the menu ended without any answer
    pub fn is_empty(&self) -> bool {
        matches!(self, Selection::NoSelection | Selection::Cancelled)
    }

    /// Texts of the picked entries, or the custom text
    pub fn texts(&self) -> Vec<&str> {
        match self {
            Selection::Single(entry) => vec![entry.text.as_str()],
            Selection::Multiple(entries) => entries.iter().map(|e| e.text.as_str()).collect(),
            Selection::Custom(text) => vec![text.as_str()],
            Selection::NoSelection | Selection::Cancelled => Vec::new(),
        }
    }
}

impl fmt::Display for Selection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Selection::NoSelection => write!(f, "no selection"),
            Selection::Cancelled => write!(f, "cancelled"),
            Selection::Single(entry) => write!(f, "{}", entry.text),
            Selection::Multiple(_) => write!(f, "{}", self.texts().join(", ")),
            Selection::Custom(text) => write!(f, "custom: {text}"),
        }
    }
}

/// Resolving half of a menu outcome. Consumed on use, so it resolves once.
#[derive(Debug)]
pub(crate) struct MenuResolver {
    tx: oneshot::Sender<Selection>,
}

impl MenuResolver {
    pub(crate) fn resolve(self, selection: Selection) {
        // The caller may have stopped waiting
        let _ = self.tx.send(selection);
    }
}

/// Future resolving to the outcome of an opened menu
#[derive(Debug)]
#[must_use = "the menu outcome is only observable by awaiting the response"]
pub struct MenuResponse {
    rx: oneshot::Receiver<Selection>,
}

impl MenuResponse {
    pub(crate) fn pair() -> (MenuResolver, MenuResponse) {
        let (tx, rx) = oneshot::channel();
        (MenuResolver { tx }, MenuResponse { rx })
    }
}

impl Future for MenuResponse {
    type Output = Selection;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|result| result.unwrap_or(Selection::Cancelled))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::ServerMessage;

    fn abc() -> Menu {
        Menu::new("Pick", ["A", "B", "C"])
    }

    #[test]
    fn test_menu_validate_ok() {
        assert!(abc().validate().is_ok());
        assert!(Menu::new("Empty", Vec::<String>::new()).validate().is_ok());
    }

    #[test]
    fn test_menu_validate_selected_out_of_range() {
        let menu = abc().with_options(MenuOptions::new().with_selected(3));
        assert_eq!(
            menu.validate(),
            Err(MenuError::SelectedOutOfRange { index: 3, len: 3 })
        );
    }

    #[test]
    fn test_menu_validate_long_entry() {
        let menu = Menu::new("Pick", ["x".repeat(MAX_TEXT_LEN + 1)]);
        assert!(matches!(
            menu.validate(),
            Err(MenuError::TextTooLong { field: "entry", .. })
        ));
    }

    #[test]
    fn test_menu_validate_entry_at_limit() {
        let menu = Menu::new("x".repeat(MAX_TEXT_LEN), ["é".repeat(MAX_TEXT_LEN / 2) + "a"]);
        assert_eq!(menu.validate(), Ok(()));
        assert!(ServerMessage::MenuOpen(menu).encode().is_ok());
    }

    #[test]
    fn test_menu_validate_too_many_entries() {
        let menu = Menu::new("Pick", vec![String::new(); MAX_ITEMS + 1]);
        assert_eq!(menu.validate(), Err(MenuError::TooManyEntries(MAX_ITEMS + 1)));
    }

    #[test]
    fn test_resolve_single() {
        let selection = abc().resolve(&Response::Single(1)).unwrap();
        assert_eq!(
            selection,
            Selection::Single(MenuEntry {
                index: 1,
                text: "B".to_string()
            })
        );
        assert_eq!(selection.to_string(), "B");
    }

    #[test]
    fn test_resolve_single_out_of_range() {
        assert_eq!(
            abc().resolve(&Response::Single(7)),
            Err(DisconnectReason::IndexOutOfRange { index: 7, len: 3 })
        );
    }

    #[test]
    fn test_resolve_multiple_keeps_order_and_duplicates() {
        let menu = abc().with_options(MenuOptions::new().with_multi());
        let selection = menu.resolve(&Response::Multiple(vec![2, 0, 2])).unwrap();
        assert_eq!(selection.texts(), vec!["C", "A", "C"]);
    }

    #[test]
    fn test_resolve_multiple_requires_option() {
        assert_eq!(
            abc().resolve(&Response::Multiple(vec![0])),
            Err(DisconnectReason::MultiNotAllowed)
        );
    }

    #[test]
    fn test_resolve_custom_requires_option() {
        assert_eq!(
            abc().resolve(&Response::Custom("D".into())),
            Err(DisconnectReason::CustomNotAllowed)
        );

        let menu = abc().with_options(MenuOptions::new().with_custom());
        assert_eq!(
            menu.resolve(&Response::Custom("D".into())),
            Ok(Selection::Custom("D".into()))
        );
    }

    #[test]
    fn test_selection_is_empty() {
        assert!(Selection::NoSelection.is_empty());
        assert!(Selection::Cancelled.is_empty());
        assert!(!Selection::Custom(String::new()).is_empty());
    }

    #[tokio::test]
    async fn test_response_resolves_once() {
        let (resolver, response) = MenuResponse::pair();
        resolver.resolve(Selection::NoSelection);
        assert_eq!(response.await, Selection::NoSelection);
    }

    #[tokio::test]
    async fn test_dropped_resolver_reads_as_cancelled() {
        let (resolver, response) = MenuResponse::pair();
        drop(resolver);
        assert_eq!(response.await, Selection::Cancelled);
    }
}
