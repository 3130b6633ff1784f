//! # 宛先
//!
//! 外部の宛先ソースから供給される「送信可能な宛先」と、
//! 送信レコード作成時に固定される差し込み項目のスナップショットを定義する。
//!
//! 宛先リストの取り込み（アップロードの解析・検証）はこのシステムの範囲外で、
//! ここでは検証済みの宛先を受け取る側の型だけを扱う。

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::value_objects::EmailAddress;

define_uuid_id! {
    /// 宛先 ID
    pub struct RecipientId;
}

define_uuid_id! {
    /// 宛先ソース ID
    ///
    /// キャンペーンが参照する宛先リストの識別子。
    pub struct RecipientSourceId;
}

define_uuid_id! {
    /// テンプレート ID
    pub struct TemplateId;
}

/// 送信可能な宛先
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub id:            RecipientId,
    pub email:         EmailAddress,
    pub first_name:    Option<String>,
    pub last_name:     Option<String>,
    /// 任意の追加項目（差し込み変数として参照される）
    pub custom_fields: BTreeMap<String, String>,
}

impl Recipient {
    /// 表示名（姓名を空白区切りで連結したもの）
    ///
    /// 姓名がどちらも無ければ `None`。
    pub fn display_name(&self) -> Option<String> {
        let parts: Vec<&str> = [self.first_name.as_deref(), self.last_name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        if parts.is_empty() {
            None
        } else {
            Some(parts.join(" "))
        }
    }

    /// 差し込み項目のスナップショットを作成する
    pub fn merge_fields(&self) -> MergeFields {
        MergeFields {
            first_name: self.first_name.clone(),
            last_name:  self.last_name.clone(),
            full_name:  self.display_name(),
            email:      self.email.as_str().to_string(),
            custom:     self.custom_fields.clone(),
        }
    }
}

/// 差し込み項目のスナップショット
///
/// 送信レコード作成時に宛先から写し取り、JSONB として保存する。
/// 後から宛先ソースが変わっても、送信内容はこの時点の値で決まる。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name:  Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_name:  Option<String>,
    pub email:      String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub custom:     BTreeMap<String, String>,
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn recipient(first: Option<&str>, last: Option<&str>) -> Recipient {
        Recipient {
            id:            RecipientId::new(),
            email:         EmailAddress::new("yamada@example.com").unwrap(),
            first_name:    first.map(String::from),
            last_name:     last.map(String::from),
            custom_fields: BTreeMap::from([("plan".to_string(), "gold".to_string())]),
        }
    }

    #[test]
    fn test_表示名は姓名を空白で連結する() {
        let sut = recipient(Some("Taro"), Some("Yamada"));
        assert_eq!(sut.display_name(), Some("Taro Yamada".to_string()));
    }

    #[test]
    fn test_姓名が空なら表示名はnone() {
        let sut = recipient(None, Some("  "));
        assert_eq!(sut.display_name(), None);
    }

    #[test]
    fn test_差し込み項目に追加項目とメールアドレスが含まれる() {
        let sut = recipient(Some("Taro"), None).merge_fields();

        assert_eq!(sut.full_name, Some("Taro".to_string()));
        assert_eq!(sut.email, "yamada@example.com");
        assert_eq!(sut.custom.get("plan"), Some(&"gold".to_string()));
    }

    #[test]
    fn test_差し込み項目はjsonで往復できる() {
        let fields = recipient(Some("Taro"), Some("Yamada")).merge_fields();
        let json = serde_json::to_value(&fields).unwrap();

        assert_eq!(json["first_name"], "Taro");
        assert_eq!(serde_json::from_value::<MergeFields>(json).unwrap(), fields);
    }
}
