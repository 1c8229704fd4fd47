//! The blocking page shown when the candidate is outside the exam shell.
//!
//! The page has no interactive elements apart from the download link.

/// Renders the instruction page.
#[must_use]
pub fn render(shell_name: &str, download_url: &str) -> String {
    let shell = escape(shell_name);
    let url = escape(download_url);
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="utf-8">
<meta name="viewport" content="width=device-width, initial-scale=1">
<title>{shell} required</title>
<style>
body {{ margin: 0; min-height: 100vh; display: flex; align-items: center; justify-content: center; font-family: system-ui, sans-serif; background: #0f172a; color: #e2e8f0; }}
main {{ max-width: 36rem; padding: 2rem; text-align: center; }}
a {{ color: #38bdf8; }}
</style>
</head>
<body>
<main>
<h1>This assessment must be taken in {shell}</h1>
<p>Your browser is not an approved exam environment. Install {shell}, then open the assessment link from inside it.</p>
<p><a href="{url}" rel="noopener noreferrer">Download {shell}</a></p>
</main>
</body>
</html>
"#
    )
}

fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}
