/// UUID v7 をラップする ID 型を定義する
///
/// 生成される型は `new()`（UUID v7 を採番）、`from_uuid()`（DB の値から復元）、
/// `as_uuid()` を持ち、`Display` は UUID の文字列表現になる。
///
/// ```rust
/// use hikyaku_domain::email::EmailRecordId;
///
/// let id = EmailRecordId::new();
/// assert_eq!(EmailRecordId::from_uuid(*id.as_uuid()), id);
/// ```
macro_rules! define_uuid_id {
    (
        $(#[$meta:meta])*
        $vis:vis struct $Name:ident;
    ) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, PartialEq, Eq, Hash,
            serde::Serialize, serde::Deserialize,
            derive_more::Display,
        )]
        #[display("{_0}")]
        #[serde(transparent)]
        $vis struct $Name(uuid::Uuid);

        impl $Name {
            pub fn new() -> Self {
                Self(uuid::Uuid::now_v7())
            }

            pub fn from_uuid(uuid: uuid::Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &uuid::Uuid {
                &self.0
            }
        }

        impl Default for $Name {
            fn default() -> Self {
                Self::new()
            }
        }
    };
}
