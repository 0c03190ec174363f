//! Terminal rendering of menus and parsing of typed answers.

use alines_core::{Menu, Response};

/// Render a menu for the terminal
pub fn render_menu(menu: &Menu) -> String {
    let mut out = format!("== {} ==\n", menu.title);
    for (index, entry) in menu.entries.iter().enumerate() {
        let marker = if menu.options.selected_index == Some(index) {
            '>'
        } else {
            ' '
        };
        out.push_str(&format!("{marker} [{index}] {entry}\n"));
    }

    let mut hint = vec!["N to pick", "- for none"];
    if menu.options.allow_multi {
        hint.push("N,M,... for several");
    }
    if menu.options.allow_custom {
        hint.push("=text for custom");
    }
    out.push_str(&format!("({})", hint.join(", ")));
    out
}

/// Parse a typed answer into a response for `menu`.
///
/// `-` or an empty line is no selection, `=text` is custom text, `N` picks
/// one entry and `N,M` picks several.
///
/// # Errors
///
/// Returns an error for unparsable indices, indices outside the menu, or a
/// selection mode the menu does not allow.
pub fn parse_answer(line: &str, menu: &Menu) -> anyhow::Result<Response> {
    let line = line.trim();

    if line.is_empty() || line == "-" {
        return Ok(Response::NoSelection);
    }

    if let Some(text) = line.strip_prefix('=') {
        if !menu.options.allow_custom {
            anyhow::bail!("This menu does not accept custom entries");
        }
        return Ok(Response::Custom(text.to_string()));
    }

    let indices = line
        .split(',')
        .map(|part| parse_index(part.trim(), menu))
        .collect::<anyhow::Result<Vec<_>>>()?;

    match indices.as_slice() {
        [index] => Ok(Response::Single(*index)),
        _ if menu.options.allow_multi => Ok(Response::Multiple(indices)),
        _ => anyhow::bail!("This menu accepts a single entry"),
    }
}

fn parse_index(part: &str, menu: &Menu) -> anyhow::Result<u16> {
    let index: u16 = part
        .parse()
        .map_err(|_| anyhow::anyhow!("Invalid entry number: {part}"))?;
    if usize::from(index) >= menu.entries.len() {
        anyhow::bail!(
            "Entry {index} does not exist (menu has {} entries)",
            menu.entries.len()
        );
    }
    Ok(index)
}

#[cfg(test)]
mod tests {
    use super::*;
    use alines_core::MenuOptions;

    fn menu(options: MenuOptions) -> Menu {
        Menu::new("Pick", ["A", "B", "C"]).with_options(options)
    }

    #[test]
    fn test_parse_none() {
        let m = menu(MenuOptions::default());
        assert_eq!(parse_answer("", &m).unwrap(), Response::NoSelection);
        assert_eq!(parse_answer(" - ", &m).unwrap(), Response::NoSelection);
    }

    #[test]
    fn test_parse_single() {
        let m = menu(MenuOptions::default());
        assert_eq!(parse_answer("1", &m).unwrap(), Response::Single(1));
        assert!(parse_answer("3", &m).is_err());
        assert!(parse_answer("x", &m).is_err());
    }

    #[test]
    fn test_parse_multiple() {
        let m = menu(MenuOptions::new().with_multi());
        assert_eq!(
            parse_answer("2, 0", &m).unwrap(),
            Response::Multiple(vec![2, 0])
        );
        assert!(parse_answer("0,1", &menu(MenuOptions::default())).is_err());
    }

    #[test]
    fn test_parse_custom() {
        let m = menu(MenuOptions::new().with_custom());
        assert_eq!(
            parse_answer("=other", &m).unwrap(),
            Response::Custom("other".to_string())
        );
        assert!(parse_answer("=other", &menu(MenuOptions::default())).is_err());
    }

    #[test]
    fn test_render_marks_selected() {
        let rendered = render_menu(&menu(MenuOptions::new().with_selected(1)));
        assert!(rendered.starts_with("== Pick ==\n"));
        assert!(rendered.contains("> [1] B"));
        assert!(rendered.contains("  [0] A"));
    }
}
