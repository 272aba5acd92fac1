// Copyright (c) 2026 shaneyale (shaneyale86@gmail.com)
// All rights reserved.

//! # 标头集合模块
//!
//! [`Headers`] 是请求与响应共用的有序多值映射：
//! - 名称查找大小写不敏感，但保留首次写入时的原始大小写，序列化时原样输出；
//! - 同名的多个值按加入顺序保存；
//! - 写入的名称与值都会校验，阻止 CR/LF 注入；
//! - 冻结之后所有修改操作都返回 [`Exception::HeadersReadOnly`]。

use crate::exception::Exception;

#[derive(Debug, Clone, Default)]
pub struct Headers {
    entries: Vec<(String, Vec<String>)>,
    frozen: bool,
}

impl Headers {
    pub fn new() -> Self {
        Self::default()
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|(key, _)| key.eq_ignore_ascii_case(name))
    }

    fn check_writable(&self) -> Result<(), Exception> {
        if self.frozen {
            Err(Exception::HeadersReadOnly)
        } else {
            Ok(())
        }
    }

    /// 返回该名称的第一个值
    pub fn get_first(&self, name: &str) -> Option<&str> {
        self.position(name)
            .and_then(|i| self.entries[i].1.first())
            .map(|v| v.as_str())
    }

    /// 返回该名称的全部值，名称不存在时返回空切片
    pub fn get_all(&self, name: &str) -> &[String] {
        match self.position(name) {
            Some(i) => &self.entries[i].1,
            None => &[],
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// 该名称的逗号分隔值中是否含有 `token`，大小写不敏感
    pub fn has_token(&self, name: &str, token: &str) -> bool {
        self.get_all(name)
            .iter()
            .flat_map(|v| v.split(','))
            .any(|t| t.trim().eq_ignore_ascii_case(token))
    }

    /// 追加一个值，已存在的同名值保持不变
    pub fn add(&mut self, name: &str, value: &str) -> Result<(), Exception> {
        self.check_writable()?;
        check_name(name)?;
        check_value(value)?;
        match self.position(name) {
            Some(i) => self.entries[i].1.push(value.to_string()),
            None => self
                .entries
                .push((name.to_string(), vec![value.to_string()])),
        }
        Ok(())
    }

    /// 用单个值替换该名称已有的全部值
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), Exception> {
        self.check_writable()?;
        check_name(name)?;
        check_value(value)?;
        match self.position(name) {
            Some(i) => self.entries[i].1 = vec![value.to_string()],
            None => self
                .entries
                .push((name.to_string(), vec![value.to_string()])),
        }
        Ok(())
    }

    /// 删除该名称的全部值，返回被删除的值
    pub fn remove(&mut self, name: &str) -> Result<Option<Vec<String>>, Exception> {
        self.check_writable()?;
        Ok(self.position(name).map(|i| self.entries.remove(i).1))
    }

    /// 续行折叠：把一段文本以单个空格拼接到该名称最后一个值的末尾
    pub(crate) fn fold_into_last(&mut self, name: &str, extra: &str) -> Result<(), Exception> {
        self.check_writable()?;
        let values = match self.position(name) {
            Some(i) => &mut self.entries[i].1,
            None => return Err(Exception::MalformedHeader(extra.to_string())),
        };
        if let Some(last) = values.last_mut() {
            if !last.is_empty() {
                last.push(' ');
            }
            last.push_str(extra);
        }
        Ok(())
    }

    /// 按首次加入的顺序遍历（原始名称，全部值）
    pub fn iter(&self) -> impl Iterator<Item = (&str, &[String])> + '_ {
        self.entries
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> + '_ {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// 不同名称的数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }
}

fn check_name(name: &str) -> Result<(), Exception> {
    if name.is_empty() || !name.bytes().all(|b| b.is_ascii_graphic() && b != b':') {
        return Err(Exception::InvalidHeaderName(name.to_string()));
    }
    Ok(())
}

// CR 必须紧跟 LF 再跟空格或制表符；单独的 LF 一律非法
fn check_value(value: &str) -> Result<(), Exception> {
    let bytes = value.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'\r' => {
                let folded = bytes.get(i + 1) == Some(&b'\n')
                    && matches!(bytes.get(i + 2), Some(b' ') | Some(b'\t'));
                if !folded {
                    return Err(Exception::InvalidHeaderValue(value.to_string()));
                }
                i += 3;
            }
            b'\n' => return Err(Exception::InvalidHeaderValue(value.to_string())),
            _ => i += 1,
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_insensitive_lookup_preserves_case() {
        let mut headers = Headers::new();
        headers.add("X-Request-Id", "42").unwrap();
        assert_eq!(headers.get_first("x-request-id"), Some("42"));
        assert_eq!(headers.get_first("X-REQUEST-ID"), Some("42"));
        assert_eq!(headers.names().collect::<Vec<_>>(), vec!["X-Request-Id"]);
    }

    #[test]
    fn test_multiple_values_keep_order() {
        let mut headers = Headers::new();
        headers.add("Accept", "text/html").unwrap();
        headers.add("accept", "application/json").unwrap();
        assert_eq!(headers.len(), 1);
        assert_eq!(
            headers.get_all("ACCEPT"),
            &["text/html".to_string(), "application/json".to_string()]
        );
        assert_eq!(headers.get_first("Accept"), Some("text/html"));
    }

    #[test]
    fn test_has_token_across_values() {
        let mut headers = Headers::new();
        headers.add("Connection", "Upgrade, Keep-Alive").unwrap();
        headers.add("connection", "close").unwrap();
        assert!(headers.has_token("CONNECTION", "keep-alive"));
        assert!(headers.has_token("Connection", "Close"));
        assert!(!headers.has_token("Connection", "clos"));
        assert!(!headers.has_token("Upgrade", "close"));
    }

    #[test]
    fn test_set_replaces_all_values() {
        let mut headers = Headers::new();
        headers.add("Vary", "a").unwrap();
        headers.add("Vary", "b").unwrap();
        headers.set("vary", "c").unwrap();
        assert_eq!(headers.get_all("Vary"), &["c".to_string()]);
    }

    #[test]
    fn test_remove() {
        let mut headers = Headers::new();
        headers.add("Cookie", "a=1").unwrap();
        assert_eq!(headers.remove("cookie").unwrap(), Some(vec!["a=1".to_string()]));
        assert!(!headers.contains("Cookie"));
        assert_eq!(headers.remove("Cookie").unwrap(), None);
        assert!(headers.get_all("Cookie").is_empty());
    }

    #[test]
    fn test_frozen_headers_reject_writes() {
        let mut headers = Headers::new();
        headers.add("Host", "example.com").unwrap();
        headers.freeze();
        assert!(matches!(headers.add("A", "b"), Err(Exception::HeadersReadOnly)));
        assert!(matches!(headers.set("Host", "x"), Err(Exception::HeadersReadOnly)));
        assert!(matches!(headers.remove("Host"), Err(Exception::HeadersReadOnly)));
        assert_eq!(headers.get_first("host"), Some("example.com"));
    }

    #[test]
    fn test_rejects_response_splitting() {
        let mut headers = Headers::new();
        assert!(matches!(
            headers.set("Location", "/a\r\nSet-Cookie: evil=1"),
            Err(Exception::InvalidHeaderValue(_))
        ));
        assert!(matches!(
            headers.set("Location", "/a\nb"),
            Err(Exception::InvalidHeaderValue(_))
        ));
        assert!(matches!(
            headers.set("Location", "/a\r"),
            Err(Exception::InvalidHeaderValue(_))
        ));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_accepts_folded_value() {
        let mut headers = Headers::new();
        headers.set("X-Long", "first\r\n second").unwrap();
        assert_eq!(headers.get_first("x-long"), Some("first\r\n second"));
    }

    #[test]
    fn test_rejects_bad_names() {
        let mut headers = Headers::new();
        assert!(matches!(headers.add("", "v"), Err(Exception::InvalidHeaderName(_))));
        assert!(matches!(headers.add("Bad Name", "v"), Err(Exception::InvalidHeaderName(_))));
        assert!(matches!(headers.add("A:B", "v"), Err(Exception::InvalidHeaderName(_))));
    }

    #[test]
    fn test_fold_into_last_value() {
        let mut headers = Headers::new();
        headers.add("X-Folded", "one").unwrap();
        headers.add("X-Folded", "two").unwrap();
        headers.fold_into_last("x-folded", "three").unwrap();
        assert_eq!(
            headers.get_all("X-Folded"),
            &["one".to_string(), "two three".to_string()]
        );
    }
}
