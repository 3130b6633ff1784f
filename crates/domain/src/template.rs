//! # テンプレート展開
//!
//! 件名・HTML・テキスト本文中の `{{ 変数名 }}` プレースホルダを、
//! 宛先ごとの変数マップで置き換える。
//!
//! ## 展開規則
//!
//! - テンプレートは 1 回だけ走査する（置換結果を再走査しない）
//! - `{{` と `}}` の内側は前後の空白を除いて変数名とみなす
//! - 変数名の照合は大文字小文字を区別しない
//! - 解決できない変数は空文字列になる
//! - 閉じられていない `{{` 以降はそのまま出力する

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::recipient::MergeFields;

/// テンプレートの内容
///
/// 外部のテンプレートリゾルバから受け取る件名・本文の組。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateContent {
    pub subject:   Option<String>,
    pub html:      Option<String>,
    pub text:      Option<String>,
    /// テンプレートが宣言している変数名
    #[serde(default)]
    pub variables: Vec<String>,
}

/// 展開済みのメール内容
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub subject: String,
    pub html:    Option<String>,
    pub text:    Option<String>,
}

impl TemplateContent {
    /// 空でない件名を返す
    pub fn subject(&self) -> Option<&str> {
        self.subject
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }

    /// 件名と本文をまとめて展開する
    ///
    /// 件名は呼び出し側で解決済み（キャンペーンの上書き件名 or テンプレート件名）のものを渡す。
    pub fn render(&self, subject: &str, variables: &VariableMap) -> RenderedContent {
        RenderedContent {
            subject: render(subject, variables),
            html:    self.html.as_deref().map(|h| render(h, variables)),
            text:    self.text.as_deref().map(|t| render(t, variables)),
        }
    }
}

/// 差し込み変数のマップ
///
/// キーは小文字化して保持し、照合時も小文字化して引く。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VariableMap(HashMap<String, String>);

impl VariableMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// 変数を追加する（同名があれば上書き）
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.0.insert(name.trim().to_lowercase(), value.into());
    }

    /// 変数を引く
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(&name.trim().to_lowercase()).map(String::as_str)
    }

    /// 差し込み項目のスナップショットから変数マップを作る
    ///
    /// 組み込み変数は `firstName` / `lastName` / `fullName`（別名 `name`）/ `email`。
    /// 追加項目は組み込み変数と名前が衝突しない限り、その名前で追加される。
    pub fn from_merge_fields(fields: &MergeFields) -> Self {
        let mut map = Self::new();

        let first = fields.first_name.clone().unwrap_or_default();
        let last = fields.last_name.clone().unwrap_or_default();
        let full = fields.full_name.clone().unwrap_or_default();

        map.insert("firstName", first);
        map.insert("lastName", last);
        map.insert("fullName", full.clone());
        map.insert("name", full);
        map.insert("email", fields.email.clone());

        for (key, value) in &fields.custom {
            if map.get(key).is_none() {
                map.insert(key, value.clone());
            }
        }

        map
    }
}

/// テンプレート文字列を展開する
///
/// ```rust
/// use hikyaku_domain::template::{VariableMap, render};
///
/// let mut vars = VariableMap::new();
/// vars.insert("firstName", "Taro");
///
/// assert_eq!(render("Hi {{firstName}}", &vars), "Hi Taro");
/// assert_eq!(render("Hi {{ FIRSTNAME }}!", &vars), "Hi Taro!");
/// assert_eq!(render("Hi {{unknown}}", &vars), "Hi ");
/// ```
pub fn render(template: &str, variables: &VariableMap) -> String {
    let mut output = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(open) = rest.find("{{") {
        output.push_str(&rest[..open]);
        let after_open = &rest[open + 2..];

        let Some(close) = after_open.find("}}") else {
            // 閉じ括弧が無い
            output.push_str(&rest[open..]);
            return output;
        };

        let name = after_open[..close].trim();
        if let Some(value) = variables.get(name) {
            output.push_str(value);
        }
        rest = &after_open[close + 2..];
    }

    output.push_str(rest);
    output
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use pretty_assertions::assert_eq;
    use rstest::{fixture, rstest};

    use super::*;

    #[fixture]
    fn vars() -> VariableMap {
        VariableMap::from_merge_fields(&MergeFields {
            first_name: Some("Hanako".to_string()),
            last_name:  Some("Sato".to_string()),
            full_name:  Some("Hanako Sato".to_string()),
            email:      "hanako@example.com".to_string(),
            custom:     BTreeMap::from([
                ("coupon".to_string(), "AUTUMN10".to_string()),
                ("email".to_string(), "override@example.com".to_string()),
            ]),
        })
    }

    #[rstest]
    #[case("Hi {{firstName}}", "Hi Hanako")]
    #[case("{{ lastname }} 様", "Sato 様")]
    #[case("{{fullName}} / {{name}}", "Hanako Sato / Hanako Sato")]
    #[case("code: {{COUPON}}", "code: AUTUMN10")]
    #[case("{{unknown}}!", "!")]
    #[case("no placeholder", "no placeholder")]
    #[case("{{firstName}}{{lastName}}", "HanakoSato")]
    #[case("broken {{firstName", "broken {{firstName")]
    #[case("a }} b", "a }} b")]
    fn test_プレースホルダを展開する(vars: VariableMap, #[case] input: &str, #[case] expected: &str) {
        assert_eq!(render(input, &vars), expected);
    }

    #[rstest]
    fn test_追加項目は組み込み変数を上書きしない(vars: VariableMap) {
        assert_eq!(render("{{email}}", &vars), "hanako@example.com");
    }

    #[test]
    fn test_置換結果は再走査しない() {
        let mut vars = VariableMap::new();
        vars.insert("a", "{{b}}");
        vars.insert("b", "NG");

        assert_eq!(render("{{a}}", &vars), "{{b}}");
    }

    #[test]
    fn test_姓名が無い宛先は空文字で展開される() {
        let vars = VariableMap::from_merge_fields(&MergeFields {
            email: "x@example.com".to_string(),
            ..Default::default()
        });

        assert_eq!(render("Hi {{firstName}}", &vars), "Hi ");
    }

    #[rstest]
    fn test_件名と本文をまとめて展開する(vars: VariableMap) {
        let template = TemplateContent {
            subject:   Some("ignored".to_string()),
            html:      Some("<p>{{firstName}}</p>".to_string()),
            text:      None,
            variables: vec!["firstName".to_string()],
        };

        let sut = template.render("{{firstName}} さんへ", &vars);

        assert_eq!(
            sut,
            RenderedContent {
                subject: "Hanako さんへ".to_string(),
                html:    Some("<p>Hanako</p>".to_string()),
                text:    None,
            }
        );
    }

    #[test]
    fn test_空白だけの件名は件名なしとみなす() {
        let template = TemplateContent {
            subject: Some("   ".to_string()),
            ..Default::default()
        };

        assert_eq!(template.subject(), None);
    }
}
