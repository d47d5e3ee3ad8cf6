use std::collections::HashMap;

/// Render a message template.
///
/// Each line may start with any number of conditions: `{TAG?}` keeps the line
/// only when `TAG` has a non-empty value, `{TAG!}` only when it does not.
/// After the conditions are consumed, `{TAG}` placeholders are substituted.
/// Placeholders without a known value are left intact, they belong to the
/// template's consumer.
pub fn render(template: &str, vars: &HashMap<&str, String>) -> Vec<String> {
    template
        .lines()
        .filter_map(|line| render_line(line, vars))
        .collect()
}

fn render_line(line: &str, vars: &HashMap<&str, String>) -> Option<String> {
    let mut rest = line;

    // Evaluate head-of-line conditions
    loop {
        let Some(tag) = head_condition(rest) else {
            break;
        };
        let (name, want_present, len) = tag;
        let present = vars.get(name).map(|v| !v.is_empty()).unwrap_or(false);
        if present != want_present {
            return None;
        }
        rest = &rest[len..];
    }

    Some(substitute(rest, vars))
}

/// Parse a `{TAG?}` or `{TAG!}` at the start of the line.
fn head_condition(line: &str) -> Option<(&str, bool, usize)> {
    let inner = line.strip_prefix('{')?;
    let end = inner.find('}')?;
    let tag = &inner[..end];
    let (name, want_present) = if let Some(name) = tag.strip_suffix('?') {
        (name, true)
    } else if let Some(name) = tag.strip_suffix('!') {
        (name, false)
    } else {
        return None;
    };
    Some((name, want_present, end + 2))
}

fn substitute(line: &str, vars: &HashMap<&str, String>) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let tail = &rest[open..];
        match tail[1..].find('}') {
            Some(close) => {
                let name = &tail[1..close + 1];
                match vars.get(name) {
                    Some(value) => out.push_str(value),
                    // Unknown placeholder stays intact
                    None => out.push_str(&tail[..close + 2]),
                }
                rest = &tail[close + 2..];
            }
            None => {
                out.push_str(tail);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&'static str, &str)]) -> HashMap<&'static str, String> {
        pairs.iter().map(|(k, v)| (*k, v.to_string())).collect()
    }

    #[test]
    fn plain_substitution() {
        let vars = vars(&[("NAME", "alice"), ("GAME", "test game")]);
        let out = render("Welcome {NAME} to {GAME}!", &vars);
        assert_eq!(out, vec!["Welcome alice to test game!"]);
    }

    #[test]
    fn unknown_placeholder_left_intact() {
        let vars = vars(&[("NAME", "alice")]);
        let out = render("Hi {NAME}, map is {MAP_URL}", &vars);
        assert_eq!(out, vec!["Hi alice, map is {MAP_URL}"]);
    }

    #[test]
    fn positive_condition_keeps_or_drops() {
        let with = vars(&[("URL", "http://example.test/map.w3x")]);
        let without = vars(&[("URL", "")]);
        let template = "{URL?}Download the map at {URL}";
        assert_eq!(
            render(template, &with),
            vec!["Download the map at http://example.test/map.w3x"]
        );
        assert!(render(template, &without).is_empty());
    }

    #[test]
    fn negative_condition() {
        let with = vars(&[("OWNER", "bob")]);
        let without = vars(&[]);
        let template = "{OWNER!}This game has no owner yet";
        assert!(render(template, &with).is_empty());
        assert_eq!(render(template, &without), vec!["This game has no owner yet"]);
    }

    #[test]
    fn stacked_conditions() {
        let vars = vars(&[("A", "x"), ("B", "")]);
        assert_eq!(render("{A?}{B!}both hold", &vars), vec!["both hold"]);
        assert!(render("{A?}{B?}needs both", &vars).is_empty());
    }

    #[test]
    fn multiline_template() {
        let vars = vars(&[("NAME", "carol"), ("HCL", "")]);
        let template = "Hello {NAME}\n{HCL?}Mode: {HCL}\nHave fun";
        assert_eq!(render(template, &vars), vec!["Hello carol", "Have fun"]);
    }
}
