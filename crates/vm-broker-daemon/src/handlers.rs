//! WebSocket request handlers for the daemon

use tracing::debug;
use vm_broker::{Result, ServerApi, TransactionId};

use crate::protocol::{Request, Response};

/// Handle a request from a client
///
/// Broker errors become [`Response::Error`]; this never fails.
pub async fn handle_request(request: Request, api: &ServerApi) -> Response {
    debug!("Handling request: {:?}", request);

    let outcome = match request {
        Request::Create(args) => started(api.create(args).await),
        Request::CreateResult { transaction } => api
            .create_result(transaction)
            .await
            .map(|result| Response::Created { result }),

        Request::Start(args) => started(api.start(args).await),
        Request::StartResult { transaction } => done(api.start_result(transaction).await),

        Request::Stop { name } => started(api.stop(&name).await),
        Request::StopResult { transaction } => done(api.stop_result(transaction).await),

        Request::Quit { name } => started(api.quit(&name).await),
        Request::QuitResult { transaction } => done(api.quit_result(transaction).await),

        Request::Delete { name } => started(api.delete(&name).await),
        Request::DeleteResult { transaction } => done(api.delete_result(transaction).await),

        Request::GetInstanceDetails { name } => started(api.get_instance_details(&name).await),
        Request::GetInstanceDetailsResult { transaction } => api
            .get_instance_details_result(transaction)
            .await
            .map(|details| Response::InstanceDetails { details }),

        Request::GetInstances => started(api.get_instances().await),
        Request::GetInstancesResult { transaction } => api
            .get_instances_result(transaction)
            .await
            .map(|names| Response::Instances { names }),

        Request::Cancel { transaction } => api
            .cancel(transaction)
            .await
            .map(|()| Response::CancelRequested),

        Request::ListTransactions => api
            .transactions()
            .await
            .map(|transactions| Response::Transactions { transactions }),
    };

    outcome.unwrap_or_else(Response::from)
}

fn started(result: Result<TransactionId>) -> Result<Response> {
    result.map(|transaction| Response::TransactionStarted { transaction })
}

fn done(result: Result<()>) -> Result<Response> {
    result.map(|()| Response::Done)
}
