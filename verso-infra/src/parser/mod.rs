pub mod markdown;

pub use markdown::MarkdownParser;
