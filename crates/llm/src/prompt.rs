//! Prompt construction for event narratives and the daily digest.

/// Built-in digest template, used when no template file is supplied.
pub const DEFAULT_DIGEST_TEMPLATE: &str = "\
# Daily Report

## Work completed today

## Problems and resolutions

## Plan for tomorrow
";

/// Replace every `{key}` in `template` with its value.
pub fn render(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Prompt for a single change event.  `content` is an excerpt of the file
/// for creations and modifications.
pub fn event_prompt(
    template: &str,
    action: &str,
    path: &str,
    timestamp: &str,
    content: Option<&str>,
) -> String {
    let content = match content {
        Some(text) if !text.trim().is_empty() => format!("Content excerpt:\n{text}"),
        _ => String::new(),
    };
    render(
        template,
        &[
            ("action", action),
            ("path", path),
            ("timestamp", timestamp),
            ("content", &content),
        ],
    )
}

/// Prompt asking for a daily report in the shape of `template`, grounded in
/// the given `(path, contents)` pairs.
pub fn digest_prompt(template: &str, files: &[(String, String)]) -> String {
    let mut prompt = String::from(
        "Write a daily report from the file contents below, following the template.\n\n",
    );
    prompt.push_str("Report template:\n");
    prompt.push_str(template);
    prompt.push_str("\n\nRelated file contents:\n");
    for (path, contents) in files {
        prompt.push_str(&format!("\nFile: {path}\nContents:\n{contents}\n"));
        prompt.push_str(&"=".repeat(50));
        prompt.push('\n');
    }
    prompt.push_str(
        "\nRequirements:\n\
         1. Summarise the main work done today\n\
         2. List problems encountered and how they were solved\n\
         3. State the plan for tomorrow\n\
         4. Follow the template format and output only the report\n",
    );
    prompt
}
