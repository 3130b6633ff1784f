//! # API レスポンスエンベロープ
//!
//! 公開 API の統一レスポンス形式 `{ "data": T }` を提供する。

use serde::{Deserialize, Serialize};

/// 公開 API の統一レスポンス型
///
/// ## 使用例
///
/// ```
/// use hikyaku_shared::ApiResponse;
///
/// let response = ApiResponse::new("hello");
/// assert_eq!(response.data, "hello");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub data: T,
}

impl<T> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self { data }
    }
}

/// オフセットページング付きレスポンス
///
/// ```json
/// { "data": [...], "total": 120, "limit": 50, "offset": 0 }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PagedResponse<T> {
    pub data:   Vec<T>,
    pub total:  u64,
    pub limit:  u32,
    pub offset: u32,
}

impl<T> PagedResponse<T> {
    pub fn new(data: Vec<T>, total: u64, limit: u32, offset: u32) -> Self {
        Self {
            data,
            total,
            limit,
            offset,
        }
    }

    /// 次のページが残っているか
    pub fn has_more(&self) -> bool {
        u64::from(self.offset) + (self.data.len() as u64) < self.total
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_serializeでdataキーに包まれる() {
        let response = ApiResponse::new(vec!["a", "b"]);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json, serde_json::json!({ "data": ["a", "b"] }));
    }

    #[test]
    fn test_ページング情報がjsonに含まれる() {
        let response = PagedResponse::new(vec![1, 2], 5, 2, 0);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(
            json,
            serde_json::json!({ "data": [1, 2], "total": 5, "limit": 2, "offset": 0 })
        );
    }

    #[test]
    fn test_has_moreは残件の有無を返す() {
        assert!(PagedResponse::new(vec![1, 2], 5, 2, 0).has_more());
        assert!(!PagedResponse::new(vec![5], 5, 2, 4).has_more());
        assert!(!PagedResponse::<i32>::new(vec![], 0, 50, 0).has_more());
    }
}
