//! Sample-safe banner shown under the host header on every page

use super::{injected, markup};
use crate::dom::{Fragment, InsertPosition};
use crate::error::TaskError;
use crate::task::{DomPatch, InjectionTask, PageScope, TaskContext};
use futures::future::BoxFuture;
use futures::FutureExt;

pub struct SampleSafeBanner;

impl SampleSafeBanner {
    pub const NAME: &'static str = "sample-safe-banner";

    fn fragment() -> Fragment {
        Fragment::new("div")
            .class(injected::BANNER)
            .attr("role", "note")
            .text("Sample-safe beats are cleared for commercial release.")
    }
}

impl InjectionTask for SampleSafeBanner {
    fn name(&self) -> &'static str {
        Self::NAME
    }

    fn scope(&self) -> PageScope {
        PageScope::Always
    }

    fn is_already_satisfied(&self, ctx: &TaskContext) -> bool {
        ctx.exists(&format!(".{}", injected::BANNER))
    }

    fn apply<'a>(&'a self, ctx: &'a TaskContext) -> BoxFuture<'a, Result<DomPatch, TaskError>> {
        async move {
            let mut patch = DomPatch::new();
            // Pages without the host header get no banner
            if let Some(header) = ctx.query(markup::HEADER) {
                patch.insert(header, InsertPosition::After, Self::fragment());
            }
            Ok(patch)
        }
        .boxed()
    }
}
