//! Browser-driven capture (C9, spec §4.9): a narrow `Page` capability trait,
//! a concrete `chromiumoxide` adapter, and the two capture engines — API
//! fixture recording and static asset capture — that consume it.

pub mod api;
pub mod chromium;
pub mod page;
pub mod static_capture;

pub use api::{build_fixture, matches_any_pattern, CaptureOptions};
pub use chromium::{ChromiumPage, ChromiumPageFactory};
pub use page::{Page, PageEvent, RequestEvent, ResourceKind, ResponseEvent};
pub use static_capture::{capture_asset, local_path_for, CaptureLimits};
