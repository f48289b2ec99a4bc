//! `server.properties` reading and writing
//!
//! Plain `key=value` lines, order preserved. Comment lines are dropped on
//! load and not re-emitted; the server regenerates its own header anyway.

use std::path::Path;

use anyhow::{Context, Result};

/// Ordered key/value pairs from a properties file.
pub fn load(path: &Path) -> Result<Vec<(String, String)>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    Ok(parse(&text))
}

fn parse(text: &str) -> Vec<(String, String)> {
    text.lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let (key, value) = line.split_once('=')?;
            Some((key.trim().to_string(), value.trim().to_string()))
        })
        .collect()
}

/// Write the pairs back as `key=value` lines.
pub fn save(path: &Path, props: &[(String, String)]) -> Result<()> {
    let mut out = String::new();
    for (key, value) in props {
        out.push_str(key);
        out.push('=');
        out.push_str(value);
        out.push('\n');
    }
    std::fs::write(path, out).with_context(|| format!("writing {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_pairs_and_skips_comments() {
        let text = "#Minecraft server properties\n#Tue Aug 25\nmotd=A Server\nmax-players=20\n\nonline-mode=true\n";
        let props = parse(text);
        assert_eq!(
            props,
            vec![
                ("motd".to_string(), "A Server".to_string()),
                ("max-players".to_string(), "20".to_string()),
                ("online-mode".to_string(), "true".to_string()),
            ]
        );
    }

    #[test]
    fn value_may_contain_equals() {
        let props = parse("motd=a=b=c\n");
        assert_eq!(props, vec![("motd".to_string(), "a=b=c".to_string())]);
    }

    #[test]
    fn save_then_load_preserves_order() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("server.properties");
        let props = vec![
            ("level-name".to_string(), "world".to_string()),
            ("difficulty".to_string(), "hard".to_string()),
        ];
        save(&path, &props).unwrap();
        assert_eq!(load(&path).unwrap(), props);
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load(Path::new("/nonexistent/server.properties")).is_err());
    }
}
