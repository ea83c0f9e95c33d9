use pulldown_cmark::{html, Options, Parser};
use std::collections::BTreeMap;
use verso_api::{DocumentParser, FrontMatter, ParseError, ParsedDocument};

const DELIMITER: &str = "---";

/// Markdown文档解析器
///
/// 前言为文件开头由 `---` 包围的YAML块，结束行也可以写成 `...`。
#[derive(Debug, Clone)]
pub struct MarkdownParser {
    options: Options,
}

impl Default for MarkdownParser {
    fn default() -> Self {
        let mut options = Options::empty();
        options.insert(Options::ENABLE_TABLES);
        options.insert(Options::ENABLE_STRIKETHROUGH);
        options.insert(Options::ENABLE_TASKLISTS);
        options.insert(Options::ENABLE_FOOTNOTES);
        Self { options }
    }
}

impl MarkdownParser {
    pub fn new() -> Self {
        Self::default()
    }

    fn parse_front_matter(
        yaml: &str,
    ) -> Result<(FrontMatter, BTreeMap<String, serde_json::Value>), ParseError> {
        if yaml.trim().is_empty() {
            return Ok(Default::default());
        }
        let value: serde_yaml::Value =
            serde_yaml::from_str(yaml).map_err(|e| ParseError::Malformed(e.to_string()))?;
        let fields = match &value {
            serde_yaml::Value::Null => return Ok(Default::default()),
            serde_yaml::Value::Mapping(mapping) => raw_fields(mapping),
            _ => return Err(ParseError::Malformed("front matter must be a mapping".to_string())),
        };
        let front_matter =
            serde_yaml::from_value(value).map_err(|e| ParseError::Malformed(e.to_string()))?;
        Ok((front_matter, fields))
    }
}

/// 原样保留键名；非字符串键按YAML写法转成字符串
fn raw_fields(mapping: &serde_yaml::Mapping) -> BTreeMap<String, serde_json::Value> {
    mapping
        .iter()
        .filter_map(|(key, value)| {
            let key = match key {
                serde_yaml::Value::String(key) => key.clone(),
                other => serde_yaml::to_string(other).ok()?.trim().to_string(),
            };
            let value = serde_json::to_value(value).ok()?;
            Some((key, value))
        })
        .collect()
}

/// 按行切分，附带每行在原文中的起止偏移
fn lines_with_offsets(text: &str) -> impl Iterator<Item = (&str, usize, usize)> {
    let mut offset = 0;
    text.split_inclusive('\n').map(move |line| {
        let start = offset;
        offset += line.len();
        (line.trim_end_matches(['\n', '\r']), start, offset)
    })
}

impl DocumentParser for MarkdownParser {
    fn extract(&self, text: &str) -> Result<ParsedDocument, ParseError> {
        let text = text.strip_prefix('\u{feff}').unwrap_or(text);

        let mut lines = lines_with_offsets(text);
        let opening = match lines.next() {
            Some((line, _, end)) if line.trim_end() == DELIMITER => end,
            _ => {
                return Ok(ParsedDocument {
                    body: text.to_string(),
                    ..ParsedDocument::default()
                })
            }
        };

        for (line, start, end) in lines {
            let line = line.trim_end();
            if line == DELIMITER || line == "..." {
                let yaml = &text[opening..start];
                let (front_matter, fields) = Self::parse_front_matter(yaml)?;
                let body = text[end..].trim_start_matches(['\n', '\r']).to_string();
                return Ok(ParsedDocument {
                    front_matter,
                    fields,
                    body,
                });
            }
        }

        Err(ParseError::Unterminated)
    }

    fn render(&self, body: &str) -> String {
        let parser = Parser::new_ext(body, self.options);
        let mut output = String::with_capacity(body.len() * 3 / 2);
        html::push_html(&mut output, parser);
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_front_matter_and_body() {
        let parser = MarkdownParser::new();
        let doc = parser
            .extract("---\ntitle: Hello\ntags: [rust, cache]\ndraft: true\nhero: a.png\n---\n\n# Body\n")
            .unwrap();

        assert_eq!(doc.front_matter.title.as_deref(), Some("Hello"));
        assert_eq!(doc.front_matter.tags, vec!["rust", "cache"]);
        assert_eq!(doc.front_matter.draft, Some(true));
        assert_eq!(doc.front_matter.extra.get("hero"), Some(&serde_json::json!("a.png")));
        assert_eq!(doc.body, "# Body\n");
    }

    #[test]
    fn test_raw_fields_keep_original_key_names() {
        let parser = MarkdownParser::new();
        let doc = parser
            .extract("---\ncontentId: shared\nlastmod: 2024-01-02\ncategory: News\n---\n")
            .unwrap();

        assert_eq!(doc.front_matter.content_id.as_deref(), Some("shared"));
        assert_eq!(doc.fields.get("contentId"), Some(&serde_json::json!("shared")));
        assert_eq!(doc.fields.get("lastmod"), Some(&serde_json::json!("2024-01-02")));
        assert_eq!(doc.fields.get("category"), Some(&serde_json::json!("News")));
        assert!(!doc.fields.contains_key("content_id"));
        assert!(!doc.fields.contains_key("categories"));
    }

    #[test]
    fn test_document_without_front_matter() {
        let parser = MarkdownParser::new();
        let doc = parser.extract("Just text\n---\nmore").unwrap();
        assert_eq!(doc.front_matter, FrontMatter::default());
        assert_eq!(doc.body, "Just text\n---\nmore");
    }

    #[test]
    fn test_crlf_and_empty_front_matter() {
        let parser = MarkdownParser::new();
        let doc = parser.extract("---\r\n---\r\nBody").unwrap();
        assert_eq!(doc.front_matter, FrontMatter::default());
        assert_eq!(doc.body, "Body");

        let doc = parser.extract("---\r\ntitle: Windows\r\n...\r\nBody").unwrap();
        assert_eq!(doc.front_matter.title.as_deref(), Some("Windows"));
    }

    #[test]
    fn test_unterminated_and_malformed() {
        let parser = MarkdownParser::new();
        assert!(matches!(parser.extract("---\ntitle: x\n"), Err(ParseError::Unterminated)));
        assert!(matches!(parser.extract("---\ntitle: [x\n---\n"), Err(ParseError::Malformed(_))));
        assert!(matches!(parser.extract("---\njust a string\n---\n"), Err(ParseError::Malformed(_))));
    }

    #[test]
    fn test_render_supports_tables_and_strikethrough() {
        let parser = MarkdownParser::new();
        let html = parser.render("| a | b |\n|---|---|\n| 1 | 2 |\n\n~~gone~~");
        assert!(html.contains("<table>"));
        assert!(html.contains("<del>gone</del>"));
        assert_eq!(parser.render("# Title").trim(), "<h1>Title</h1>");
    }
}
