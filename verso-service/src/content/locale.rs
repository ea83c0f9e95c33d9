use regex::Regex;
use verso_domain::content::parent_path;

use super::options::ContentOptions;

const LANGUAGE_TAG_PATTERN: &str = r"^[A-Za-z]{2,3}(?:-(?:[A-Za-z]{2}|[A-Za-z]{4}|[0-9]{3}))?$";
const NON_SLUG_PATTERN: &str = r"[^\p{L}\p{N}]+";

/// 路由解析：语言识别、slug生成与规范URL
///
/// 生成URL与从URL解析语言使用同一套规则，保证二者互逆。
#[derive(Debug, Clone)]
pub struct RouteResolver {
    enabled: bool,
    default_locale: String,
    supported: Vec<String>,
    language_tag: Regex,
    non_slug: Regex,
}

impl RouteResolver {
    pub fn new(options: &ContentOptions) -> Result<Self, regex::Error> {
        Ok(Self {
            enabled: options.enable_localization,
            default_locale: options.default_locale.clone(),
            supported: options.supported_locales.clone(),
            language_tag: Regex::new(LANGUAGE_TAG_PATTERN)?,
            non_slug: Regex::new(NON_SLUG_PATTERN)?,
        })
    }

    pub fn default_locale(&self) -> &str {
        &self.default_locale
    }

    /// 路径段是否为语言，返回语言的规范写法
    pub fn locale_segment(&self, segment: &str) -> Option<String> {
        if !self.enabled || segment.is_empty() {
            return None;
        }
        if self.supported.is_empty() {
            return self
                .language_tag
                .is_match(segment)
                .then(|| segment.to_string());
        }
        self.supported
            .iter()
            .find(|locale| locale.eq_ignore_ascii_case(segment))
            .cloned()
    }

    /// 拆分出语言与剩余路径
    ///
    /// `has_leaf` 为真时最后一段是文件名或slug，不参与语言识别。
    pub fn split<'a>(&self, relative: &'a str, has_leaf: bool) -> (String, &'a str) {
        let relative = relative.trim_matches('/');
        let (first, rest) = match relative.split_once('/') {
            Some((first, rest)) => (first, rest),
            None if has_leaf => return (self.default_locale.clone(), relative),
            None => (relative, ""),
        };
        match self.locale_segment(first) {
            Some(locale) => (locale, rest),
            None => (self.default_locale.clone(), relative),
        }
    }

    /// 从站点相对URL解析语言
    pub fn locale_of_url(&self, url: &str) -> String {
        self.split(url, true).0
    }

    /// 跨语言分组ID：去掉语言段与扩展名的相对路径
    pub fn grouping_id(&self, relative: &str) -> String {
        let (_, rest) = self.split(relative, true);
        let file_start = rest.rfind('/').map(|idx| idx + 1).unwrap_or(0);
        match rest[file_start..].rfind('.') {
            Some(dot) if dot > 0 => rest[..file_start + dot].to_string(),
            _ => rest.to_string(),
        }
    }

    pub fn slugify(&self, text: &str) -> String {
        let lower = text.trim().to_lowercase();
        self.non_slug
            .replace_all(&lower, "-")
            .trim_matches('-')
            .to_string()
    }

    /// 规范URL：相对路径的最后一段替换为slug
    pub fn item_url(&self, relative: &str, slug: &str) -> String {
        let parent = parent_path(relative.trim_matches('/'));
        if parent.is_empty() {
            slug.to_string()
        } else {
            format!("{}/{}", parent, slug)
        }
    }
}

/// 文件名去掉扩展名
pub fn file_stem(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot > 0 => &name[..dot],
        _ => name,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver(supported: &[&str]) -> RouteResolver {
        RouteResolver::new(&ContentOptions {
            supported_locales: supported.iter().map(|s| s.to_string()).collect(),
            ..ContentOptions::default()
        })
        .unwrap()
    }

    #[test]
    fn test_language_tag_heuristic() {
        let r = resolver(&[]);
        assert_eq!(r.locale_segment("fr").as_deref(), Some("fr"));
        assert_eq!(r.locale_segment("pt-BR").as_deref(), Some("pt-BR"));
        assert_eq!(r.locale_segment("zh-Hant").as_deref(), Some("zh-Hant"));
        assert_eq!(r.locale_segment("es-419").as_deref(), Some("es-419"));
        assert_eq!(r.locale_segment("blog"), None);
        assert_eq!(r.locale_segment("2024"), None);
    }

    #[test]
    fn test_supported_list_wins_over_heuristic() {
        let r = resolver(&["en", "pt-BR"]);
        assert_eq!(r.locale_segment("PT-br").as_deref(), Some("pt-BR"));
        assert_eq!(r.locale_segment("fr"), None);
    }

    #[test]
    fn test_split_files_and_directories() {
        let r = resolver(&[]);
        assert_eq!(r.split("fr/blog/post1.md", true), ("fr".to_string(), "blog/post1.md"));
        assert_eq!(r.split("blog/post1.md", true), ("en".to_string(), "blog/post1.md"));
        // 根下的文件名不会被当作语言
        assert_eq!(r.split("de.md", true), ("en".to_string(), "de.md"));
        assert_eq!(r.split("de", true), ("en".to_string(), "de"));
        assert_eq!(r.split("de", false), ("de".to_string(), ""));
    }

    #[test]
    fn test_localization_disabled() {
        let r = RouteResolver::new(&ContentOptions {
            enable_localization: false,
            ..ContentOptions::default()
        })
        .unwrap();
        assert_eq!(r.split("fr/blog/post1.md", true), ("en".to_string(), "fr/blog/post1.md"));
    }

    #[test]
    fn test_grouping_id() {
        let r = resolver(&[]);
        assert_eq!(r.grouping_id("en/blog/post.md"), "blog/post");
        assert_eq!(r.grouping_id("fr/blog/post.md"), "blog/post");
        assert_eq!(r.grouping_id("about.md"), "about");
        assert_eq!(r.grouping_id("v1.2/notes"), "v1.2/notes");
    }

    #[test]
    fn test_slugify() {
        let r = resolver(&[]);
        assert_eq!(r.slugify("Hello, World!"), "hello-world");
        assert_eq!(r.slugify("  Rust & Caching  "), "rust-caching");
        assert_eq!(r.slugify("Éléphant rosé"), "éléphant-rosé");
        assert_eq!(r.slugify("!!!"), "");
    }

    #[test]
    fn test_url_round_trip() {
        let r = resolver(&[]);
        let url = r.item_url("fr/blog/post1.md", "bonjour");
        assert_eq!(url, "fr/blog/bonjour");
        assert_eq!(r.locale_of_url(&url), "fr");

        let url = r.item_url("about.md", "about");
        assert_eq!(url, "about");
        assert_eq!(r.locale_of_url(&url), "en");
    }

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("post1.md"), "post1");
        assert_eq!(file_stem("archive.tar.md"), "archive.tar");
        assert_eq!(file_stem(".hidden"), ".hidden");
    }
}
