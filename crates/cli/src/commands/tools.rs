//! `dawpilot tools`: list the tool catalog.

use dawpilot_core::tool::ToolRegistry;

pub fn run(json: bool) -> anyhow::Result<()> {
    let registry = dawpilot_tools::default_registry();
    if json {
        println!("{}", serde_json::to_string_pretty(registry.specs())?);
    } else {
        print!("{}", render(&registry));
    }
    Ok(())
}

/// One line per tool; destructive tools are flagged.
fn render(registry: &ToolRegistry) -> String {
    let width = registry.names().iter().map(|n| n.len()).max().unwrap_or(0);
    let mut out = format!("{} tools ({} destructive)\n\n", registry.len(), registry.destructive_names().len());
    for spec in registry.specs() {
        let flag = if spec.destructive { "[destructive] " } else { "" };
        let summary = spec.description.split(". ").next().unwrap_or_default();
        out.push_str(&format!("  {:<width$}  {flag}{summary}\n", spec.name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listing_flags_destructive_tools() {
        let text = render(&dawpilot_tools::default_registry());
        assert!(text.starts_with("30 tools (4 destructive)"));
        let delete_line = text.lines().find(|l| l.trim_start().starts_with("delete_track")).unwrap();
        assert!(delete_line.contains("[destructive]"));
        let tempo_line = text.lines().find(|l| l.trim_start().starts_with("set_tempo")).unwrap();
        assert!(!tempo_line.contains("[destructive]"));
    }
}
