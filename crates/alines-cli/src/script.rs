//! Menu scripts: a TOML file listing menus to open one after another.
//!
//! ```toml
//! [[menu]]
//! title = "Pick"
//! entries = ["A", "B", "C"]
//!
//! [[menu]]
//! title = "Toppings"
//! entries = ["cheese", "olives"]
//! allow_multi = true
//! allow_custom = true
//! selected = 0
//! ```

use alines_core::{Menu, MenuOptions};
use serde::Deserialize;
use std::fs;
use std::path::Path;

/// A sequence of menus
#[derive(Debug, Clone, Deserialize)]
pub struct Script {
    /// Menus in the order they are opened
    #[serde(rename = "menu", default)]
    pub menus: Vec<ScriptMenu>,
}

/// One menu of a script
#[derive(Debug, Clone, Deserialize)]
pub struct ScriptMenu {
    /// Menu title
    pub title: String,
    /// Entries
    pub entries: Vec<String>,
    /// Allow multi selection
    #[serde(default)]
    pub allow_multi: bool,
    /// Allow custom entries
    #[serde(default)]
    pub allow_custom: bool,
    /// Preselected entry
    #[serde(default)]
    pub selected: Option<usize>,
}

impl ScriptMenu {
    /// Build the core menu
    pub fn to_menu(&self) -> Menu {
        Menu::new(self.title.clone(), self.entries.clone()).with_options(MenuOptions {
            allow_multi: self.allow_multi,
            allow_custom: self.allow_custom,
            selected_index: self.selected,
        })
    }
}

impl Script {
    /// Load and validate a script file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or contains a
    /// menu that cannot be sent.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse and validate script text
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a valid script.
    pub fn parse(contents: &str) -> anyhow::Result<Self> {
        let script: Self = toml::from_str(contents)?;
        if script.menus.is_empty() {
            anyhow::bail!("Script contains no [[menu]] entries");
        }
        for (position, menu) in script.menus.iter().enumerate() {
            menu.to_menu()
                .validate()
                .map_err(|e| anyhow::anyhow!("Menu #{} ({}): {e}", position + 1, menu.title))?;
        }
        Ok(script)
    }
}
