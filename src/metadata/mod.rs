//! 调用元数据模块
//!
//! 提供大小写不敏感的多值元数据 [`Metadata`]，以及承载入站 / 出站元数据、
//! 流级 header / trailer 缓冲区的调用上下文 [`Context`]。
//!
//! # 不变式
//!
//! - 键统一折叠为小写
//! - 每个键对应有序的值列表，重复的头部不会丢失
//! - `set` 替换该键的全部值，`append` 只追加
//! - `clone` 是深拷贝，副本与原值互不影响
//! - 合并同一个键时按合并顺序拼接值列表，从不覆盖

mod context;

pub use context::{CallScope, Context, MetadataError};

use serde::Serialize;
use std::collections::HashMap;
use std::collections::hash_map;

/// 大小写不敏感的多值元数据
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct Metadata {
    entries: HashMap<String, Vec<String>>,
}

impl Metadata {
    /// 创建空元数据
    pub fn new() -> Self {
        Self::default()
    }

    /// 从键值对构造，同名键的值按出现顺序追加
    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut md = Self::new();
        for (key, value) in pairs {
            md.append(key, [value]);
        }
        md
    }

    /// 规范化键
    pub fn canonical_key(key: &str) -> String {
        key.to_ascii_lowercase()
    }

    /// 获取键对应的全部值，不存在时返回空切片
    pub fn get(&self, key: &str) -> &[String] {
        self.entries
            .get(&Self::canonical_key(key))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// 获取键对应的第一个值
    pub fn get_first(&self, key: &str) -> Option<&str> {
        self.get(key).first().map(String::as_str)
    }

    /// 替换键对应的全部值
    pub fn set<K, I, V>(&mut self, key: K, values: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let values: Vec<String> = values.into_iter().map(Into::into).collect();
        let key = Self::canonical_key(key.as_ref());
        if values.is_empty() {
            self.entries.remove(&key);
        } else {
            self.entries.insert(key, values);
        }
    }

    /// 设置单个值（替换已有值）
    pub fn insert(&mut self, key: impl AsRef<str>, value: impl Into<String>) {
        self.set(key, [value.into()]);
    }

    /// 追加值，不删除已有值
    pub fn append<K, I, V>(&mut self, key: K, values: I)
    where
        K: AsRef<str>,
        I: IntoIterator<Item = V>,
        V: Into<String>,
    {
        let mut values = values.into_iter().map(Into::into).peekable();
        if values.peek().is_none() {
            return;
        }
        self.entries
            .entry(Self::canonical_key(key.as_ref()))
            .or_default()
            .extend(values);
    }

    /// 删除键，返回被删除的值
    pub fn remove(&mut self, key: &str) -> Option<Vec<String>> {
        self.entries.remove(&Self::canonical_key(key))
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(&Self::canonical_key(key))
    }

    /// 键的数量
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn iter(&self) -> hash_map::Iter<'_, String, Vec<String>> {
        self.entries.iter()
    }

    /// 合并另一份元数据：同名键的值追加在已有值之后
    pub fn merge(&mut self, other: &Metadata) {
        for (key, values) in &other.entries {
            self.entries
                .entry(key.clone())
                .or_default()
                .extend(values.iter().cloned());
        }
    }

    /// 按顺序合并多份元数据
    pub fn join<'a, I>(parts: I) -> Metadata
    where
        I: IntoIterator<Item = &'a Metadata>,
    {
        let mut joined = Metadata::new();
        for part in parts {
            joined.merge(part);
        }
        joined
    }
}

impl<'a> IntoIterator for &'a Metadata {
    type Item = (&'a String, &'a Vec<String>);
    type IntoIter = hash_map::Iter<'a, String, Vec<String>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

impl<K, V> FromIterator<(K, V)> for Metadata
where
    K: AsRef<str>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Metadata::from_pairs(iter)
    }
}
