//! Pathnames and default object names used in diagnostics

/// Separator between the names in a system pathname
pub const PATH_SEPARATOR: &str = "::";

/// Name shown for a system or context whose name is empty
pub const UNNAMED: &str = "_";

/// Join a parent pathname and a local name. A root has an empty parent
/// pathname, so its own pathname is `::name`.
pub fn join_pathname(parent_pathname: &str, name: &str) -> String {
    let name = if name.is_empty() { UNNAMED } else { name };
    format!("{parent_pathname}{PATH_SEPARATOR}{name}")
}

/// Strip a trailing generic argument list and replace `::` runs with `/`,
/// since `::` is already the pathname separator.
pub fn type_name_without_generics(type_name: &str) -> String {
    let stripped = match type_name.find('<') {
        Some(start) if type_name.ends_with('>') => &type_name[..start],
        _ => type_name,
    };
    stripped
        .split(':')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}

/// `type/path/Name@0123456789abcdef`
pub fn memory_object_name(type_name: &str, address: usize) -> String {
    format!("{}@{:016x}", type_name_without_generics(type_name), address)
}
