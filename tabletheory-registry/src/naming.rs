//! snake_case conversion used for default store-attribute names and the
//! table-name fallback when no `#[table(name = "...")]` override is given.

pub fn to_snake_case(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 4);
    let mut prev_is_lower_or_digit = false;
    for (i, c) in s.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 && prev_is_lower_or_digit {
                out.push('_');
            }
            out.extend(c.to_lowercase());
            prev_is_lower_or_digit = false;
        } else {
            out.push(c);
            prev_is_lower_or_digit = c.is_lowercase() || c.is_ascii_digit();
        }
    }
    out
}

/// Last path segment of `std::any::type_name::<T>()`, snake_cased.
pub fn type_name_to_table_name(full_type_name: &str) -> String {
    let last = full_type_name
        .rsplit("::")
        .next()
        .unwrap_or(full_type_name);
    // Strip generic parameters, e.g. "Foo<Bar>" -> "Foo".
    let last = last.split('<').next().unwrap_or(last);
    to_snake_case(last)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn converts_camel_case() {
        assert_eq!(to_snake_case("EmailAddress"), "email_address");
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("id"), "id");
    }

    #[test]
    fn extracts_last_path_segment() {
        assert_eq!(type_name_to_table_name("my_crate::models::User"), "user");
    }
}
