//! Bindings index page.
//!
//! A single static-looking HTML table: one row per active plugin with its
//! primary binding, aliases, description, and example invocation. Rebuilt on
//! every request so a reload shows up immediately.

use crate::config::BunnylolConfig;
use crate::plugins::RegistrySnapshot;

pub fn render_bindings_page(config: &BunnylolConfig, snapshot: &RegistrySnapshot) -> String {
    let display_url = html_escape(&config.server.display_url());

    let mut rows = String::new();
    for plugin in snapshot.list() {
        let bindings = plugin.bindings();
        let name = bindings.first().map(|s| s.as_str()).unwrap_or("(none)");
        let aliases = if bindings.len() > 1 {
            bindings[1..].join(", ")
        } else {
            String::new()
        };
        rows.push_str(&format!(
            "<tr>\
                <td class=\"cmd\">{}</td>\
                <td class=\"cmd aliases\">{}</td>\
                <td>{}</td>\
                <td class=\"example\">{}</td>\
            </tr>\n",
            html_escape(name),
            html_escape(&aliases),
            html_escape(plugin.description()),
            html_escape(plugin.example()),
        ));
    }

    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<meta name="viewport" content="width=device-width, initial-scale=1.0">
<title>bunnylol</title>
<style>
*{{margin:0;padding:0;box-sizing:border-box}}
body{{font-family:-apple-system,BlinkMacSystemFont,'Helvetica Neue',sans-serif;color:#333;max-width:900px;margin:0 auto;padding:48px 24px}}
header{{text-align:center;margin-bottom:48px}}
header h1{{font-size:1.4em;font-weight:600;margin-bottom:4px}}
header p{{color:#999;font-size:.8em;font-family:'SF Mono',Menlo,Consolas,monospace}}
table{{width:100%;border-collapse:collapse;font-size:.88em}}
th{{text-align:left;padding:6px 12px;border-bottom:2px solid #e0e0e0;font-weight:600;color:#666;font-size:.75em;text-transform:uppercase;letter-spacing:.05em}}
td{{padding:7px 12px;border-bottom:1px solid #f0f0f0;vertical-align:top}}
tr:hover{{background:#fafafa}}
.cmd{{font-family:'SF Mono',Menlo,Consolas,monospace;font-weight:600;white-space:nowrap}}
.aliases{{font-weight:400;color:#999}}
.example{{font-family:'SF Mono',Menlo,Consolas,monospace;color:#999;font-size:.9em}}
</style>
</head>
<body>
<header>
<h1>bunnylol</h1>
<p>{display_url}</p>
</header>
<table>
<thead><tr><th>Command</th><th>Aliases</th><th>Description</th><th>Example</th></tr></thead>
<tbody>
{rows}</tbody>
</table>
</body>
</html>"#
    )
}

fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
