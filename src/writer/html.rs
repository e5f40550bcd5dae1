//! HTML shell of a published visualization

use crate::spec::SpecNode;
use crate::writer::Writer;
use crate::Result;

pub const TEMPLATE_CSS: &str = "\
body {
  font-family: system-ui, -apple-system, \"Segoe UI\", Roboto, sans-serif;
  margin: 1.5em;
}
#root {
  display: flex;
  flex-direction: column;
  gap: 1em;
}
.vconcat, .hconcat {
  gap: 0.5em;
}
.input label {
  display: inline-flex;
  align-items: center;
  gap: 0.5em;
}
table {
  border-collapse: collapse;
  font-size: 0.9em;
}
th, td {
  padding: 0.2em 0.6em;
  border-bottom: 1px solid #ddd;
}
";

/// `index.html` of the artifact
///
/// A static shell holds markup and, if given, the custom script. An
/// interactive shell loads `index.js`, runs the post-load script, then
/// constructs the element and mounts it into `#root` (replacing any
/// prerendered markup) and finally runs the custom script.
#[derive(Debug, Clone)]
pub struct HtmlShell {
    pub title: String,
    pub css: String,
    pub interactive: bool,
    /// Markup shown before the client program runs
    pub markup: Option<String>,
    pub post_load: Option<String>,
    pub custom_script: Option<String>,
}

impl HtmlShell {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            css: TEMPLATE_CSS.to_string(),
            interactive: false,
            markup: None,
            post_load: None,
            custom_script: None,
        }
    }

    pub fn interactive(mut self, interactive: bool) -> Self {
        self.interactive = interactive;
        self
    }

    pub fn with_markup(mut self, markup: impl Into<String>) -> Self {
        self.markup = Some(markup.into());
        self
    }

    pub fn with_post_load(mut self, script: Option<String>) -> Self {
        self.post_load = script;
        self
    }

    pub fn with_custom_script(mut self, script: Option<String>) -> Self {
        self.custom_script = script.filter(|s| !s.trim().is_empty());
        self
    }

    fn script(&self) -> String {
        let mut lines = vec![
            "import createElement, { getVgInstance } from \"./index.js\";".to_string(),
        ];
        if let Some(post_load) = &self.post_load {
            lines.push(format!("await {};", post_load.trim_end().trim_end_matches(';')));
        }
        lines.push(
            "document.querySelector(\"#root\").replaceChildren(createElement());".to_string(),
        );
        if let Some(custom) = &self.custom_script {
            lines.push(custom.trim_end().to_string());
        }
        lines.join("\n")
    }

    fn render(&self, description: Option<&str>) -> String {
        let mut head = vec![
            "<meta charset=\"utf-8\">".to_string(),
            "<meta name=\"viewport\" content=\"width=device-width, initial-scale=1\">".to_string(),
            format!("<title>{}</title>", escape_text(&self.title)),
        ];
        if let Some(description) = description {
            head.push(format!(
                "<meta name=\"description\" content=\"{}\">",
                escape_text(description).replace('"', "&quot;")
            ));
        }
        head.push(format!("<style>\n{}</style>", self.css));

        let markup = self.markup.as_deref().unwrap_or("");
        let mut body = vec![format!("<div id=\"root\">{}</div>", markup)];
        if self.interactive {
            body.push(format!("<script type=\"module\">\n{}\n</script>", self.script()));
        } else if let Some(custom) = &self.custom_script {
            body.push(format!("<script type=\"module\">\n{}\n</script>", custom.trim_end()));
        }

        format!(
            "<!DOCTYPE html>\n<html lang=\"en\">\n<head>\n{}\n</head>\n<body>\n{}\n</body>\n</html>\n",
            head.join("\n"),
            body.join("\n")
        )
    }
}

impl Writer for HtmlShell {
    fn write(&self, spec: &SpecNode) -> Result<String> {
        self.validate(spec)?;
        Ok(self.render(spec.meta.description.as_deref()))
    }

    fn validate(&self, _spec: &SpecNode) -> Result<()> {
        Ok(())
    }
}

fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spec::{ComponentNode, SpecNode};

    fn spec() -> SpecNode {
        SpecNode::new(ComponentNode::VConcat { children: vec![] })
    }

    #[test]
    fn test_static_shell() {
        let html = HtmlShell::new("Flights & more")
            .with_markup("<div class=\"plot\"></div>")
            .write(&spec())
            .unwrap();

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Flights &amp; more</title>"));
        assert!(html.contains("<div id=\"root\"><div class=\"plot\"></div></div>"));
        assert!(!html.contains("<script"));
    }

    #[test]
    fn test_interactive_shell_order() {
        let html = HtmlShell::new("t")
            .interactive(true)
            .with_post_load(Some("getVgInstance().coordinator().exec([], {priority: 2})".to_string()))
            .with_custom_script(Some("console.log('ready');".to_string()))
            .write(&spec())
            .unwrap();

        assert!(html.contains("<div id=\"root\"></div>"));
        let import = html
            .find("import createElement, { getVgInstance } from \"./index.js\";")
            .unwrap();
        let post_load = html
            .find("await getVgInstance().coordinator().exec([], {priority: 2});")
            .unwrap();
        let mount = html.find("replaceChildren(createElement())").unwrap();
        let custom = html.find("console.log('ready');").unwrap();
        assert!(import < post_load && post_load < mount && mount < custom);
    }

    #[test]
    fn test_static_shell_keeps_custom_script() {
        let html = HtmlShell::new("t")
            .with_markup("<svg></svg>")
            .with_custom_script(Some("console.log('static');\n".to_string()))
            .write(&spec())
            .unwrap();

        assert!(html.contains("<script type=\"module\">\nconsole.log('static');\n</script>"));
        assert!(!html.contains("index.js"));
        assert!(html.find("<svg></svg>").unwrap() < html.find("console.log").unwrap());
    }

    #[test]
    fn test_blank_custom_script_is_dropped() {
        let shell = HtmlShell::new("t")
            .interactive(true)
            .with_custom_script(Some("  \n".to_string()));
        assert!(shell.custom_script.is_none());
    }

    #[test]
    fn test_description_meta() {
        let mut spec = spec();
        spec.meta.description = Some("Delays by \"hour\"".to_string());
        let html = HtmlShell::new("t").write(&spec).unwrap();
        assert!(html.contains("content=\"Delays by &quot;hour&quot;\""));
    }
}
