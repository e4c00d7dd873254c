/// Normalize model output into a single-line SQL statement: drops ```` ```sql ````
/// and ```` ``` ```` fences, trims, and collapses whitespace runs to one space.
pub fn sanitize_sql_query(raw: &str) -> String {
    let mut unfenced = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(pos) = rest.find("```") {
        unfenced.push_str(&rest[..pos]);
        let after = &rest[pos + 3..];
        rest = after.strip_prefix("sql").unwrap_or(after);
    }
    unfenced.push_str(rest);
    unfenced.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_fences_and_collapses_whitespace() {
        let raw = "```sql\nSELECT id,\n       name\nFROM   hive.web.users\n```\n";
        assert_eq!(sanitize_sql_query(raw), "SELECT id, name FROM hive.web.users");
        assert_eq!(sanitize_sql_query("```\nSELECT 1\n```"), "SELECT 1");
        assert_eq!(sanitize_sql_query("  SELECT\t1 "), "SELECT 1");
        assert_eq!(sanitize_sql_query(""), "");
    }

    #[test]
    fn is_idempotent() {
        for raw in [
            "```sql SELECT  1```",
            "````sql\nSELECT `a`\n``",
            "a``` ```sql b",
            "SELECT '```' AS fence",
            "\n\n",
        ] {
            let once = sanitize_sql_query(raw);
            assert_eq!(sanitize_sql_query(&once), once, "input: {raw:?}");
        }
    }
}
