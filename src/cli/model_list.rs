//! Model listing functionality

use std::fmt::Write;

use crate::core::catalog::ModelCatalog;

pub fn list_models(catalog: &ModelCatalog, configured_default: Option<&str>) {
    print!("{}", render_model_list(catalog, configured_default));
}

/// Models grouped by category, in catalog order. The default model is marked.
pub fn render_model_list(catalog: &ModelCatalog, configured_default: Option<&str>) -> String {
    let default_id = configured_default
        .filter(|id| catalog.contains(id))
        .unwrap_or(&catalog.default_model().id);

    let mut out = String::new();
    let _ = writeln!(out, "🤖 Available Models");
    let _ = writeln!(out, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    for category in catalog.categories() {
        let _ = writeln!(out);
        let _ = writeln!(out, "{category}:");
        for model in catalog.by_category(category) {
            let marker = if model.id == default_id { "*" } else { " " };
            let _ = writeln!(out, "  {marker} {}", model.id);
            let _ = writeln!(out, "      {} · {}", model.display_name, model.description);
        }
    }

    let _ = writeln!(out);
    let _ = writeln!(out, "* default; change with `polychat set default-model <id>`");
    out
}
