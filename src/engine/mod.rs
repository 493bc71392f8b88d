use crate::imports::*;

/*
    The connection seam to the embedded analytical query engine. The
    activation manager only ever needs "run this statement, tell me if the
    engine accepted it", so that is the whole contract. A single handle is
    shared by every activation and deactivation call; no pooling.
*/

#[async_trait::async_trait]
pub trait SqlEngine: Send + Sync {
    async fn execute(&self, sql: &str) -> Result<()>;
}
