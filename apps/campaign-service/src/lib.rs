//! # Campaign Service ライブラリ
//!
//! Campaign Service の設定・ユースケース・ハンドラを公開する。
//! 結合テストからルーターとユースケースを組み立てられるようにする。

pub mod app_builder;
pub mod config;
pub mod error;
pub mod handler;
pub mod usecase;
