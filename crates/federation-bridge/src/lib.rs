//! # federation-bridge
//!
//! Render-side glue between a host and its remotes.
//!
//! This crate provides:
//! - A data-fetch cache that runs each module's data fetch once and carries
//!   results from a server pass into the client pass
//! - Lazy remote components that suspend on their module and data, then
//!   render the module or a fallback
//! - Collection of the style and script assets a server render must emit

pub mod assets;
pub mod data_fetch;
pub mod lazy;

pub use assets::{
    collect_instance_assets, collect_ssr_assets, render_assets, AssetDescriptor, AssetKind,
    CollectOptions,
};
pub use data_fetch::{
    data_fetch_fn, ready_getter, DataFetchCache, DataFetchEntry, DataFetchFn, DataFetchGetter,
    DataFetchKey, DataFetchParams, DataFetchStatus, DataFetchType, FetchedData,
};
pub use lazy::{
    module_loader, DowngradePolicy, FallbackRenderer, LazyComponent, LazyOptions, LoadState,
    LoadedModule, ModuleLoader, RenderAttempt, RenderEffect, RenderMode, RenderProps,
};
