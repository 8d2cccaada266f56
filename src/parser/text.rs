use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

const MAX_SLUG_CHARS: usize = 80;

/// 统计字数
///
/// 西文按空白分隔的词计数，中日韩字符每个字算一个词；纯标点不计数
pub fn count_words(text: &str) -> i64 {
    let mut count = 0;
    let mut in_word = false;
    let mut word_has_alnum = false;

    for ch in text.chars() {
        if is_cjk(ch) {
            if in_word && word_has_alnum {
                count += 1;
            }
            in_word = false;
            word_has_alnum = false;
            count += 1;
        } else if ch.is_whitespace() {
            if in_word && word_has_alnum {
                count += 1;
            }
            in_word = false;
            word_has_alnum = false;
        } else {
            in_word = true;
            word_has_alnum |= ch.is_alphanumeric();
        }
    }

    if in_word && word_has_alnum {
        count += 1;
    }
    count
}

fn is_cjk(ch: char) -> bool {
    matches!(ch as u32,
        0x3040..=0x30FF   // 平假名、片假名
        | 0x3400..=0x4DBF // CJK 扩展 A
        | 0x4E00..=0x9FFF // CJK 统一汉字
        | 0xAC00..=0xD7AF // 韩文音节
        | 0xF900..=0xFAFF)
}

/// 根据标题生成 slug
///
/// 保留各语言的字母和数字（中文标题不会被清空），其余字符折叠为 `-`
pub fn slugify(title: &str) -> String {
    static NON_WORD: OnceLock<Regex> = OnceLock::new();
    let re = NON_WORD.get_or_init(|| Regex::new(r"[^\p{L}\p{N}]+").expect("slug regex"));

    let lower = title.to_lowercase();
    let slug = re.replace_all(&lower, "-");
    let slug: String = slug.trim_matches('-').chars().take(MAX_SLUG_CHARS).collect();
    let slug = slug.trim_end_matches('-');

    if slug.is_empty() {
        "chapter".to_string()
    } else {
        slug.to_string()
    }
}

/// 在已占用的 slug 集合中找到第一个可用的：`base`, `base-2`, `base-3`...
pub fn unique_slug(base: &str, taken: &HashSet<String>) -> String {
    if !taken.contains(base) {
        return base.to_string();
    }
    (2..)
        .map(|n| format!("{}-{}", base, n))
        .find(|candidate| !taken.contains(candidate))
        .unwrap_or_else(|| base.to_string())
}

/// 把连续空白折叠成一个空格
pub fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
