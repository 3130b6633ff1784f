//! ユースケース層の共通ヘルパー
//!
//! リポジトリ呼び出し結果の変換など、複数のユースケースで繰り返されるパターンを共通化する。

use hikyaku_infra::InfraError;

use crate::error::ServiceError;

/// リポジトリの `Result<Option<T>, InfraError>` を `Result<T, ServiceError>` に変換する
///
/// ```ignore
/// let campaign = self.repos.campaigns.find_by_id(&id).await.or_not_found("キャンペーン")?;
/// ```
pub(crate) trait FindResultExt<T> {
    /// `None` の場合は `ServiceError::NotFound`、`InfraError` の場合は `ServiceError::Database` を返す
    fn or_not_found(self, entity_name: &str) -> Result<T, ServiceError>;
}

impl<T> FindResultExt<T> for Result<Option<T>, InfraError> {
    fn or_not_found(self, entity_name: &str) -> Result<T, ServiceError> {
        self?.ok_or_else(|| ServiceError::NotFound(format!("{}が見つかりません", entity_name)))
    }
}
