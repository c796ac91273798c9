//! Naming strategy: the pure mapping from entity/property names to
//! table/column/index/constraint names.
//!
//! Everything downstream of the metadata builder goes through a
//! [`NamingStrategy`]; swapping the strategy changes every derived name in
//! the schema without touching entity descriptions.

/// Converts `CamelCase` / `mixedCase` input to `snake_case`.
///
/// # Examples
///
/// ```
/// use ferrite_orm::naming::snake_case;
///
/// assert_eq!(snake_case("PostCategory"), "post_category");
/// assert_eq!(snake_case("categoryCount"), "category_count");
/// assert_eq!(snake_case("already_snake"), "already_snake");
/// ```
pub fn snake_case(input: &str) -> String {
    let mut out = String::with_capacity(input.len() + 4);
    let mut prev_lower = false;
    for ch in input.chars() {
        if ch.is_uppercase() {
            if prev_lower {
                out.push('_');
            }
            for low in ch.to_lowercase() {
                out.push(low);
            }
            prev_lower = false;
        } else {
            prev_lower = ch.is_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

/// Maps entity and property names to database identifiers.
///
/// Implementations must be pure: the same inputs always produce the same
/// names, because derived names are computed once at metadata build time
/// and again during schema synchronization.
pub trait NamingStrategy: Send + Sync {
    /// Table name for an entity, honoring an explicit override.
    fn table_name(&self, entity_name: &str, custom: Option<&str>) -> String;

    /// Column name for a property, honoring an explicit override and
    /// applying embedded prefixes outermost-first.
    fn column_name(&self, property_name: &str, custom: Option<&str>, prefixes: &[String])
        -> String;

    /// Prefix applied to an embedded object's columns when the embedding
    /// declares none.
    fn embedded_prefix(&self, property_name: &str) -> String;

    /// Column name for an implicit join column (owning side of a
    /// many-to-one / one-to-one relation).
    fn join_column_name(&self, property_name: &str, referenced_column: &str) -> String;

    /// Table name for a many-to-many junction table.
    fn join_table_name(&self, source_table: &str, target_table: &str, property_name: &str)
        -> String;

    /// Column name inside a junction table pointing at one endpoint.
    fn join_table_column_name(&self, table: &str, column: &str) -> String;

    /// Name for an index over `columns` on `table`.
    fn index_name(&self, table: &str, columns: &[String], unique: bool) -> String;

    /// Table name for a closure-table inheritance auxiliary table.
    fn closure_table_name(&self, table: &str) -> String;

    /// Column name for the materialized-path column.
    fn materialized_path_column(&self) -> String;

    /// Column name for a single-table-inheritance discriminator.
    fn discriminator_column(&self) -> String;
}

/// The default naming strategy: snake_case everything, join identifiers
/// with underscores.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultNamingStrategy;

impl NamingStrategy for DefaultNamingStrategy {
    fn table_name(&self, entity_name: &str, custom: Option<&str>) -> String {
        custom.map_or_else(|| snake_case(entity_name), ToString::to_string)
    }

    fn column_name(
        &self,
        property_name: &str,
        custom: Option<&str>,
        prefixes: &[String],
    ) -> String {
        let base = custom.map_or_else(|| snake_case(property_name), ToString::to_string);
        if prefixes.is_empty() {
            base
        } else {
            let mut out = prefixes.join("");
            out.push_str(&base);
            out
        }
    }

    fn embedded_prefix(&self, property_name: &str) -> String {
        format!("{}_", snake_case(property_name))
    }

    fn join_column_name(&self, property_name: &str, referenced_column: &str) -> String {
        format!("{}_{}", snake_case(property_name), referenced_column)
    }

    fn join_table_name(
        &self,
        source_table: &str,
        target_table: &str,
        property_name: &str,
    ) -> String {
        format!(
            "{source_table}_{}_{target_table}",
            snake_case(property_name)
        )
    }

    fn join_table_column_name(&self, table: &str, column: &str) -> String {
        format!("{table}_{column}")
    }

    fn index_name(&self, table: &str, columns: &[String], unique: bool) -> String {
        let prefix = if unique { "uq" } else { "idx" };
        format!("{prefix}_{table}_{}", columns.join("_"))
    }

    fn closure_table_name(&self, table: &str) -> String {
        format!("{table}_closure")
    }

    fn materialized_path_column(&self) -> String {
        "mpath".to_string()
    }

    fn discriminator_column(&self) -> String {
        "kind".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_conversion() {
        assert_eq!(snake_case("Post"), "post");
        assert_eq!(snake_case("PostCategory"), "post_category");
        assert_eq!(snake_case("createdAt"), "created_at");
        assert_eq!(snake_case("plain"), "plain");
        assert_eq!(snake_case("HTTPServer"), "httpserver");
    }

    #[test]
    fn table_name_uses_override() {
        let n = DefaultNamingStrategy;
        assert_eq!(n.table_name("UserProfile", None), "user_profile");
        assert_eq!(n.table_name("UserProfile", Some("profiles")), "profiles");
    }

    #[test]
    fn column_name_applies_prefixes_in_order() {
        let n = DefaultNamingStrategy;
        assert_eq!(n.column_name("zipCode", None, &[]), "zip_code");
        assert_eq!(
            n.column_name("zipCode", None, &["addr_".to_string()]),
            "addr_zip_code"
        );
        assert_eq!(
            n.column_name("city", None, &["home_".to_string(), "addr_".to_string()]),
            "home_addr_city"
        );
    }

    #[test]
    fn join_names() {
        let n = DefaultNamingStrategy;
        assert_eq!(n.join_column_name("author", "id"), "author_id");
        assert_eq!(
            n.join_table_name("post", "category", "categories"),
            "post_categories_category"
        );
        assert_eq!(n.join_table_column_name("post", "id"), "post_id");
    }

    #[test]
    fn index_names() {
        let n = DefaultNamingStrategy;
        assert_eq!(
            n.index_name("post", &["title".to_string()], false),
            "idx_post_title"
        );
        assert_eq!(
            n.index_name("post", &["a".to_string(), "b".to_string()], true),
            "uq_post_a_b"
        );
    }
}
