use super::{print_json, CliHarness};
use crate::{
    object_store,
    orchestrator::{Orchestrator, SubmitRequest},
    scheduler,
};
use anyhow::{Context, Result};

impl CliHarness {
    pub async fn submit(&self, revision: String, input_file: String) -> Result<()> {
        // The orchestrator checks this too, but by then the scheduler and tracking store are already connected.
        self.config.validate_submission()?;

        let object_store =
            object_store::new(&self.config.staging).context("Could not init object store")?;
        let scheduler = scheduler::init_scheduler(&self.config.batch)
            .await
            .context("Could not init scheduler")?;
        let tracking = self.tracking().await?;

        let orchestrator = Orchestrator::new(self.config.clone(), object_store, scheduler, tracking);

        let response = orchestrator
            .submit(SubmitRequest {
                revision,
                input_file,
            })
            .await?;

        print_json(&response)
    }
}
