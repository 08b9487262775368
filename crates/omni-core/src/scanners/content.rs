//! 内容采样扫描：只读文件前 N 字节（默认 2KB）
//!
//! - 魔数判定二进制
//! - shebang 识别
//! - `---` YAML / `+++` TOML 扁平 frontmatter 提取
//! - 关键词分类（单个 Aho-Corasick 自动机，大小写不敏感）
//! - 编码回退：UTF-8 → latin-1 → UTF-16 → cp1252，全部失败视为二进制
use aho_corasick::{AhoCorasick, AhoCorasickBuilder, MatchKind};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use super::{display, require_dir, ScanContext};
use crate::config::KeywordSet;
use crate::error::{Result, ScanError};
use crate::findings::Finding;
use crate::options::ScanTarget;
use crate::types::ScanResult;

pub const NAME: &str = "content";
pub const DEFAULT_MAX_FILES: usize = 1000;

/// 二进制魔数（PNG / JPEG / GIF / ZIP / PDF / ICO）
pub const BINARY_SIGNATURES: &[&[u8]] = &[
    b"\x89PNG",
    b"\xff\xd8\xff",
    b"GIF8",
    b"PK\x03\x04",
    b"%PDF",
    b"\x00\x00\x01\x00",
];

static SHEBANGS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"^#!/usr/bin/env python", "python"),
        (r"^#!/usr/bin/python", "python"),
        (r"^#!/bin/bash", "bash"),
        (r"^#!/usr/bin/env bash", "bash"),
        (r"^#!/bin/sh", "shell"),
        (r"^#!/usr/bin/env sh\b", "shell"),
        (r"^#!/usr/bin/env node", "javascript"),
        (r"^#!/usr/bin/env ruby", "ruby"),
    ]
    .into_iter()
    .filter_map(|(p, lang)| Regex::new(p).ok().map(|re| (re, lang)))
    .collect()
});

static YAML_FRONTMATTER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)\A---[ \t]*\r?\n(.*?)\r?\n---[ \t]*(?:\r?\n|\z)").ok());
static TOML_FRONTMATTER: Lazy<Option<Regex>> =
    Lazy::new(|| Regex::new(r"(?s)\A\+\+\+[ \t]*\r?\n(.*?)\r?\n\+\+\+[ \t]*(?:\r?\n|\z)").ok());

/// 单文件内容线索
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentHint {
    pub path: String,
    pub name: String,
    pub extension: String,
    pub is_binary: bool,
    pub shebang: Option<String>,
    pub frontmatter: Option<BTreeMap<String, String>>,
    pub keyword_matches: Vec<String>,
    pub encoding: Option<String>,
    pub sample_length: usize,
}

/// 关键词分类匹配器
pub struct KeywordMatcher {
    ac: AhoCorasick,
    /// 模式 id -> 分类下标
    pattern_category: Vec<usize>,
    categories: Vec<String>,
}

impl KeywordMatcher {
    pub fn new(sets: &[KeywordSet]) -> Result<Self> {
        let mut patterns: Vec<&str> = Vec::new();
        let mut pattern_category = Vec::new();
        for (ci, set) in sets.iter().enumerate() {
            for k in &set.keywords {
                if k.is_empty() {
                    continue;
                }
                patterns.push(k.as_str());
                pattern_category.push(ci);
            }
        }
        let ac = AhoCorasickBuilder::new()
            .ascii_case_insensitive(true)
            .match_kind(MatchKind::Standard)
            .build(&patterns)
            .map_err(|e| ScanError::Config(format!("keyword automaton: {e}")))?;
        Ok(Self { ac, pattern_category, categories: sets.iter().map(|s| s.category.clone()).collect() })
    }

    /// 返回命中的分类（按配置顺序）
    pub fn matches(&self, text: &str) -> Vec<String> {
        let mut hit = vec![false; self.categories.len()];
        for m in self.ac.find_overlapping_iter(text) {
            if let Some(&ci) = self.pattern_category.get(m.pattern().as_usize()) {
                hit[ci] = true;
            }
        }
        self.categories
            .iter()
            .zip(hit)
            .filter_map(|(c, h)| h.then(|| c.clone()))
            .collect()
    }
}

pub fn is_binary_header(header: &[u8]) -> bool {
    BINARY_SIGNATURES.iter().any(|sig| header.starts_with(sig))
}

/// 首行 shebang 对应的语言
pub fn detect_shebang(text: &str) -> Option<&'static str> {
    let first = text.lines().next()?.trim();
    SHEBANGS.iter().find(|(re, _)| re.is_match(first)).map(|(_, lang)| *lang)
}

/// 扁平 frontmatter：YAML 用 `key: value`，TOML 用 `key = value`；不支持嵌套
pub fn extract_frontmatter(text: &str) -> Option<BTreeMap<String, String>> {
    if let Some(caps) = YAML_FRONTMATTER.as_ref().and_then(|re| re.captures(text)) {
        return Some(parse_flat(caps.get(1).map_or("", |m| m.as_str()), ':'));
    }
    if let Some(caps) = TOML_FRONTMATTER.as_ref().and_then(|re| re.captures(text)) {
        return Some(parse_flat(caps.get(1).map_or("", |m| m.as_str()), '='));
    }
    None
}

fn parse_flat(block: &str, sep: char) -> BTreeMap<String, String> {
    let mut out = BTreeMap::new();
    for line in block.lines() {
        if let Some((k, v)) = line.split_once(sep) {
            let key = k.trim();
            if key.is_empty() {
                continue;
            }
            let value = v.trim().trim_matches(|c| c == '"' || c == '\'');
            out.insert(key.to_string(), value.to_string());
        }
    }
    out
}

/// 按回退链解码采样字节；返回 (文本, 编码名)。`truncated` 表示采样截断了文件
pub fn decode_sample(buf: &[u8], truncated: bool) -> Option<(String, &'static str)> {
    if let Some(s) = decode_utf8(buf, truncated) {
        return Some((s, "utf-8"));
    }
    if let Some(s) = decode_latin1(buf) {
        return Some((s, "latin-1"));
    }
    if let Some(s) = decode_utf16(buf) {
        return Some((s, "utf-16"));
    }
    decode_cp1252(buf).map(|s| (s, "cp1252"))
}

fn decode_utf8(buf: &[u8], truncated: bool) -> Option<String> {
    if buf.contains(&0) {
        return None;
    }
    match std::str::from_utf8(buf) {
        Ok(s) => Some(s.to_string()),
        // 采样截断造成的尾部不完整序列可以接受
        Err(e) if truncated && e.error_len().is_none() => std::str::from_utf8(&buf[..e.valid_up_to()]).ok().map(str::to_string),
        Err(_) => None,
    }
}

fn is_text_control(b: u8) -> bool {
    matches!(b, 0x09 | 0x0A | 0x0C | 0x0D)
}

fn decode_latin1(buf: &[u8]) -> Option<String> {
    if buf.iter().any(|&b| (b < 0x20 && !is_text_control(b)) || (0x80..=0x9F).contains(&b)) {
        return None;
    }
    Some(buf.iter().map(|&b| b as char).collect())
}

fn decode_utf16(buf: &[u8]) -> Option<String> {
    let (body, little_endian) = match buf {
        [0xFF, 0xFE, rest @ ..] => (rest, true),
        [0xFE, 0xFF, rest @ ..] => (rest, false),
        _ => {
            if buf.len() < 2 {
                return None;
            }
            let odd_nul = buf.iter().skip(1).step_by(2).any(|&b| b == 0);
            let even_nul = buf.iter().step_by(2).any(|&b| b == 0);
            match (even_nul, odd_nul) {
                (false, true) => (buf, true),
                (true, false) => (buf, false),
                _ => return None,
            }
        }
    };
    let units = body.chunks_exact(2).map(|c| {
        if little_endian {
            u16::from_le_bytes([c[0], c[1]])
        } else {
            u16::from_be_bytes([c[0], c[1]])
        }
    });
    let text: String = char::decode_utf16(units).collect::<std::result::Result<_, _>>().ok()?;
    if text.chars().any(|c| c == '\0') {
        return None;
    }
    Some(text)
}

const CP1252_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'), None, Some('\u{201A}'), Some('\u{0192}'), Some('\u{201E}'), Some('\u{2026}'),
    Some('\u{2020}'), Some('\u{2021}'), Some('\u{02C6}'), Some('\u{2030}'), Some('\u{0160}'),
    Some('\u{2039}'), Some('\u{0152}'), None, Some('\u{017D}'), None, None, Some('\u{2018}'),
    Some('\u{2019}'), Some('\u{201C}'), Some('\u{201D}'), Some('\u{2022}'), Some('\u{2013}'),
    Some('\u{2014}'), Some('\u{02DC}'), Some('\u{2122}'), Some('\u{0161}'), Some('\u{203A}'),
    Some('\u{0153}'), None, Some('\u{017E}'), Some('\u{0178}'),
];

fn decode_cp1252(buf: &[u8]) -> Option<String> {
    let mut out = String::with_capacity(buf.len());
    for &b in buf {
        let c = match b {
            0x80..=0x9F => CP1252_HIGH[(b - 0x80) as usize]?,
            _ if b < 0x20 && !is_text_control(b) => return None,
            _ => b as char,
        };
        out.push(c);
    }
    Some(out)
}

/// 读取采样并分析单个文件
pub fn analyze_file(path: &Path, relative: &str, sample_size: usize, matcher: &KeywordMatcher) -> Result<ContentHint> {
    let file = File::open(path).map_err(|e| ScanError::io(path, e))?;
    let mut buf = Vec::with_capacity(sample_size.min(64 * 1024));
    file.take(sample_size as u64).read_to_end(&mut buf).map_err(|e| ScanError::io(path, e))?;

    let mut hint = ContentHint {
        path: relative.to_string(),
        name: path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default(),
        extension: path.extension().map(|e| format!(".{}", e.to_string_lossy())).unwrap_or_default(),
        is_binary: false,
        shebang: None,
        frontmatter: None,
        keyword_matches: Vec::new(),
        encoding: None,
        sample_length: 0,
    };

    if is_binary_header(&buf) {
        hint.is_binary = true;
        return Ok(hint);
    }
    let truncated = buf.len() >= sample_size;
    let (text, encoding) = match decode_sample(&buf, truncated) {
        Some(d) => d,
        None => {
            hint.is_binary = true;
            return Ok(hint);
        }
    };

    hint.encoding = Some(encoding.to_string());
    hint.sample_length = text.chars().count();
    hint.shebang = detect_shebang(&text).map(str::to_string);
    hint.frontmatter = extract_frontmatter(&text);
    hint.keyword_matches = matcher.matches(&text);
    Ok(hint)
}

/// 扫描器入口
pub fn scan(target: &ScanTarget, ctx: &ScanContext) -> ScanResult {
    let root = match require_dir(target) {
        Ok(r) => r,
        Err(e) => return ScanResult::failed(NAME, display(target.path()), &e),
    };
    let params = &target.params;
    let pattern = params.pattern.clone().unwrap_or_else(|| "**/*".to_string());
    let max_files = params.max_files.unwrap_or(DEFAULT_MAX_FILES);
    let sample_size = params.sample_size.unwrap_or(ctx.config.content.sample_size);

    let matcher = match KeywordMatcher::new(&ctx.config.content.keyword_sets) {
        Ok(m) => m,
        Err(e) => return ScanResult::failed(NAME, display(&root), &e),
    };
    // 只读前 N 字节，不受单文件大小上限约束
    let walker = match ctx.walker(&root).max_file_size(None).include_glob(&pattern) {
        Ok(w) => w,
        Err(e) => return ScanResult::failed(NAME, display(&root), &e),
    };

    let mut result = ScanResult::new(NAME, display(&root));
    let mut hints: Vec<ContentHint> = Vec::new();
    for entry in walker.files() {
        if hints.len() >= max_files {
            break;
        }
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                result.record_error(e);
                continue;
            }
        };
        if !ctx.budget.try_take(entry.size.min(sample_size as u64)) {
            result.record_error("file budget exhausted");
            break;
        }
        match analyze_file(&entry.path, &entry.relative, sample_size, &matcher) {
            Ok(h) => hints.push(h),
            Err(e) => result.record_error(e),
        }
    }

    let binary = hints.iter().filter(|h| h.is_binary).count();
    let mut distribution: BTreeMap<String, usize> = BTreeMap::new();
    for h in &hints {
        for k in &h.keyword_matches {
            *distribution.entry(k.clone()).or_insert(0) += 1;
        }
    }
    result.set_summary("total_files", hints.len());
    result.set_summary("binary_files", binary);
    result.set_summary("text_files", hints.len() - binary);
    result.set_summary("files_with_frontmatter", hints.iter().filter(|h| h.frontmatter.is_some()).count());
    result.set_summary("files_with_shebang", hints.iter().filter(|h| h.shebang.is_some()).count());
    result.set_summary("keyword_distribution", distribution);
    result.set_metadata("category", "library");
    result.set_metadata("pattern", &pattern);
    result.set_metadata("max_files", max_files);
    result.set_metadata("sample_size", sample_size);

    result.extend(hints.iter().map(|h| {
        let kind = if h.is_binary { "binary" } else { "text" };
        Finding::new(h.path.clone(), kind).with_payload(h)
    }));
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ContentSection;
    use std::fs;
    use tempfile::TempDir;

    fn matcher() -> KeywordMatcher {
        KeywordMatcher::new(&ContentSection::default().keyword_sets).unwrap()
    }

    #[test]
    fn test_binary_magic_numbers() {
        let dir = TempDir::new().unwrap();
        let samples: [&[u8]; 5] = [
            b"\x89PNG\r\n\x1a\n---\nk: v\n---\n",
            b"\xff\xd8\xff\xe0#!/bin/bash",
            b"GIF89a federation",
            b"PK\x03\x04 council",
            b"%PDF-1.7\n---\na: b\n---\n",
        ];
        for (i, s) in samples.iter().enumerate() {
            let p = dir.path().join(format!("f{i}"));
            fs::write(&p, s).unwrap();
            let h = analyze_file(&p, "f", 2048, &matcher()).unwrap();
            assert!(h.is_binary, "sample {i}");
            assert!(h.shebang.is_none() && h.frontmatter.is_none() && h.keyword_matches.is_empty());
        }
    }

    #[test]
    fn test_shebang_table() {
        assert_eq!(detect_shebang("#!/usr/bin/env python3\nprint()"), Some("python"));
        assert_eq!(detect_shebang("#!/bin/sh\n"), Some("shell"));
        assert_eq!(detect_shebang("#!/usr/bin/env node\n"), Some("javascript"));
        assert_eq!(detect_shebang("print()\n#!/bin/bash"), None);
    }

    #[test]
    fn test_frontmatter_flat() {
        let fm = extract_frontmatter("---\ntitle: \"Hello: World\"\nuuid: 'abc'\n---\nbody").unwrap();
        assert_eq!(fm.get("title").map(String::as_str), Some("Hello: World"));
        assert_eq!(fm.get("uuid").map(String::as_str), Some("abc"));
        let toml = extract_frontmatter("+++\ntitle = \"T\"\n+++\n").unwrap();
        assert_eq!(toml.get("title").map(String::as_str), Some("T"));
        assert!(extract_frontmatter("no frontmatter\n---\n").is_none());
    }

    #[test]
    fn test_keyword_matches_in_order() {
        let m = matcher();
        assert_eq!(m.matches("A LORE entry about the Federation"), vec!["federation", "lore"]);
        assert!(m.matches("nothing here").is_empty());
    }

    #[test]
    fn test_encoding_fallback_chain() {
        assert_eq!(decode_sample(b"plain", false).map(|d| d.1), Some("utf-8"));
        // 截断的多字节尾部
        assert_eq!(decode_sample(&"héllo".as_bytes()[..2], true), Some(("h".to_string(), "utf-8")));
        assert_eq!(decode_sample(b"caf\xe9", false), Some(("café".to_string(), "latin-1")));
        let utf16: Vec<u8> = [0xFF, 0xFE].into_iter().chain("hi".encode_utf16().flat_map(|u| u.to_le_bytes())).collect();
        assert_eq!(decode_sample(&utf16, false), Some(("hi".to_string(), "utf-16")));
        assert_eq!(decode_sample(b"\x93quoted\x94", false).map(|d| d.1), Some("cp1252"));
        assert!(decode_sample(b"\x01\x02\x81\x00\x00\x00", false).is_none());
    }

    #[test]
    fn test_scan_sample_and_summary() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("doc.md"), "---\ntitle: x\n---\nThe ritual begins").unwrap();
        fs::write(dir.path().join("run"), "#!/bin/bash\necho hi\n").unwrap();
        fs::write(dir.path().join("img.png"), b"\x89PNG\r\n").unwrap();
        let res = scan(&ScanTarget::new(dir.path()), &ScanContext::default());
        assert!(res.error.is_none());
        assert_eq!(res.count, 3);
        assert_eq!(res.summary["binary_files"], 1);
        assert_eq!(res.summary["files_with_frontmatter"], 1);
        assert_eq!(res.summary["files_with_shebang"], 1);
        assert_eq!(res.summary["keyword_distribution"]["codecraft"], 1);
    }
}
