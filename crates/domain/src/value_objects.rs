//! # 共通値オブジェクト
//!
//! 複数のエンティティで共有される値オブジェクトを定義する。
//!
//! ## 含まれる型
//!
//! | 型 | ラップ対象 | 用途 |
//! |---|-----------|------|
//! | [`EmailAddress`] | `String` | 宛先・送信元のメールアドレス（正規化済み） |
//! | [`CampaignName`] | `String` | キャンペーン名 |

use serde::{Deserialize, Serialize};

use crate::DomainError;

// =========================================================================
// EmailAddress（メールアドレス）
// =========================================================================

/// メールアドレス（値オブジェクト）
///
/// 配信停止リストとの照合に使うため、生成時に trim + 小文字化して正規化する。
///
/// # 不変条件
///
/// - `local@domain` の形式で、どちらも空でない
/// - 最大 255 文字
///
/// # 使用例
///
/// ```rust
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// use hikyaku_domain::value_objects::EmailAddress;
///
/// let address = EmailAddress::new("  Taro@Example.COM ")?;
/// assert_eq!(address.as_str(), "taro@example.com");
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct EmailAddress(String);

impl EmailAddress {
    /// メールアドレスを作成する
    ///
    /// # エラー
    ///
    /// バリデーションに失敗した場合は `DomainError::Validation` を返す。
    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into().trim().to_lowercase();

        if value.is_empty() {
            return Err(DomainError::Validation(
                "メールアドレスは必須です".to_string(),
            ));
        }

        let Some((local, domain)) = value.split_once('@') else {
            return Err(DomainError::Validation(format!(
                "メールアドレスの形式が不正です: {value}"
            )));
        };

        if local.is_empty() || domain.is_empty() || domain.contains('@') {
            return Err(DomainError::Validation(format!(
                "メールアドレスの形式が不正です: {value}"
            )));
        }

        if value.len() > 255 {
            return Err(DomainError::Validation(
                "メールアドレスは255文字以内である必要があります".to_string(),
            ));
        }

        Ok(Self(value))
    }

    /// 文字列参照を取得する
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// 所有権を持つ文字列に変換する
    pub fn into_string(self) -> String {
        self.0
    }
}

impl TryFrom<String> for EmailAddress {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<EmailAddress> for String {
    fn from(value: EmailAddress) -> Self {
        value.0
    }
}

impl std::fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// =========================================================================
// CampaignName（キャンペーン名）
// =========================================================================

/// キャンペーン名（値オブジェクト）
///
/// 運用者が一覧で識別するための名前。前後の空白を除いて 1〜200 文字。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, derive_more::Display)]
pub struct CampaignName(String);

impl CampaignName {
    const MAX_CHARS: usize = 200;

    pub fn new(value: impl Into<String>) -> Result<Self, DomainError> {
        let value = value.into();
        let trimmed = value.trim();

        match trimmed.chars().count() {
            0 => Err(DomainError::Validation("キャンペーン名は必須です".to_string())),
            n if n > Self::MAX_CHARS => Err(DomainError::Validation(format!(
                "キャンペーン名は {} 文字以内で指定してください（{} 文字）",
                Self::MAX_CHARS,
                n
            ))),
            _ => Ok(Self(trimmed.to_string())),
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}
