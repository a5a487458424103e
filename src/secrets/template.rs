//! SQL statement templating for database roles.
//!
//! Role templates are plain text with `{{key}}` placeholders. Substitution is
//! purely textual: values are not quoted or escaped, so a template must never
//! interpolate caller-controlled input.

use std::collections::BTreeMap;

/// Split a block of SQL into individual statements.
///
/// Statements are separated by `;`, trimmed, and empty statements dropped.
/// Order is preserved. The split is naive: a `;` inside a string literal also
/// terminates a statement.
pub fn split_sql(sql: &str) -> Vec<String> {
    sql.split(';')
        .map(str::trim)
        .filter(|statement| !statement.is_empty())
        .map(str::to_string)
        .collect()
}

/// Substitute `{{key}}` placeholders with their values.
///
/// Placeholders without a matching key are left verbatim.
pub fn render<'a, I>(template: &str, values: I) -> String
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut rendered = template.to_string();
    for (key, value) in values {
        rendered = rendered.replace(&format!("{{{{{}}}}}", key), value);
    }
    rendered
}

/// Parse an MSSQL-style connection string (`server=host;user id=sa;...`).
///
/// Keys are trimmed and lower-cased; values are trimmed. Segments without a
/// key are skipped and a key without `=` maps to an empty value.
pub fn parse_conn_string(dsn: &str) -> BTreeMap<String, String> {
    let mut parsed = BTreeMap::new();
    for part in dsn.split(';') {
        if part.is_empty() {
            continue;
        }
        let mut pair = part.splitn(2, '=');
        let name = pair.next().unwrap_or_default().trim().to_lowercase();
        if name.is_empty() {
            continue;
        }
        let value = pair.next().map(str::trim).unwrap_or_default();
        parsed.insert(name, value.to_string());
    }
    parsed
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_split_sql_two_statements() {
        let statements = split_sql("CREATE USER [x];\nGRANT SELECT ON y TO x;\n");
        assert_eq!(statements, vec!["CREATE USER [x]", "GRANT SELECT ON y TO x"]);
    }

    #[test]
    fn test_split_sql_drops_blank_statements() {
        assert_eq!(split_sql(" ; ;\n\t;"), Vec::<String>::new());
        assert_eq!(split_sql("SELECT 1"), vec!["SELECT 1"]);
    }

    #[test]
    fn test_render_substitutes_known_placeholders() {
        let rendered = render("CREATE USER [{{name}}]", [("name", "alice")]);
        assert_eq!(rendered, "CREATE USER [alice]");
    }

    #[test]
    fn test_render_leaves_unknown_placeholders() {
        let rendered = render(
            "CREATE USER [{{name}}] WITH PASSWORD = '{{password}}' -- {{expiration}}",
            [("name", "alice"), ("password", "pw")],
        );
        assert_eq!(rendered, "CREATE USER [alice] WITH PASSWORD = 'pw' -- {{expiration}}");
    }

    #[test]
    fn test_render_replaces_every_occurrence() {
        let rendered = render(
            "CREATE USER [{{name}}];\nGRANT SELECT ON SCHEMA::app TO [{{name}}]",
            [("name", "bob")],
        );
        assert_eq!(rendered, "CREATE USER [bob];\nGRANT SELECT ON SCHEMA::app TO [bob]");
    }

    #[test]
    fn test_parse_conn_string() {
        let parsed =
            parse_conn_string("Server=tcp:db.example.net,1433; User ID = sa ;Password=p=w;;Encrypt");
        assert_eq!(parsed.get("server").map(String::as_str), Some("tcp:db.example.net,1433"));
        assert_eq!(parsed.get("user id").map(String::as_str), Some("sa"));
        assert_eq!(parsed.get("password").map(String::as_str), Some("p=w"));
        assert_eq!(parsed.get("encrypt").map(String::as_str), Some(""));
        assert_eq!(parsed.len(), 4);
    }

    proptest! {
        #[test]
        fn split_sql_yields_trimmed_non_empty_statements(input in "[a-zA-Z ;\n\t]{0,64}") {
            for statement in split_sql(&input) {
                prop_assert!(!statement.is_empty());
                prop_assert_eq!(statement.trim(), statement.as_str());
                prop_assert!(!statement.contains(';'));
            }
        }

        #[test]
        fn render_without_placeholders_is_identity(input in "[a-zA-Z0-9 \\[\\];']{0,64}") {
            prop_assert_eq!(render(&input, [("name", "alice")]), input);
        }
    }
}
