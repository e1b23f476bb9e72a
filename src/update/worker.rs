use std::io;
use std::thread::{self, JoinHandle};

use super::events::{Observer, Outcome};
use super::feed::ReleaseInfo;
use super::pipeline::UpdatePipeline;

/// Run the pipeline on a background thread so the caller stays responsive.
/// Every notification, the final `Finished` included, reaches `observer`
/// from that thread; the handle yields the same outcome.
pub fn spawn<O, C>(mut pipeline: UpdatePipeline, observer: O, mut confirm: C) -> io::Result<JoinHandle<Outcome>>
where
    O: Observer + 'static,
    C: FnMut(&ReleaseInfo) -> bool + Send + 'static,
{
    thread::Builder::new()
        .name("freshen-update".to_string())
        .spawn(move || pipeline.run(&observer, &mut confirm))
}
