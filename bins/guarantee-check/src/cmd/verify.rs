use std::sync::Arc;

use broker_api::BrokerConnector;
use broker_memory::MemoryBroker;
use pipeline::verify_delivery_guarantee;
use runtime_operator::RuntimeOperator;

use crate::config::{Effective, VerifyArgs};
use crate::error::CheckError;

pub async fn run(args: VerifyArgs) -> Result<(), CheckError> {
    let eff = Effective::new(&args)?;

    let connector: Arc<dyn BrokerConnector> = match eff.broker.as_str() {
        "memory" => Arc::new(MemoryBroker::with_config(eff.memory.clone())),
        other => return Err(CheckError::UnsupportedBroker(other.to_string())),
    };
    tracing::info!(
        broker = %eff.broker,
        service_url = %eff.operator.service_url,
        admin_url = %eff.operator.admin_url,
        "guarantee-check starting"
    );

    let operator = RuntimeOperator::connect(connector.as_ref(), eff.operator.clone()).await?;

    let checks = async {
        let mut failed = 0;
        for &guarantee in &eff.guarantees {
            match verify_delivery_guarantee(&operator, connector.clone(), guarantee, eff.settings.clone()).await {
                Ok(report) => println!("PASS {report}"),
                Err(e) => {
                    println!("FAIL {guarantee}: {e}");
                    failed += 1;
                }
            }
        }
        failed
    };

    let outcome = tokio::select! {
        failed = checks => Ok(failed),
        signal = tokio::signal::ctrl_c() => match signal {
            Ok(()) => Err(CheckError::Interrupted),
            Err(e) => Err(CheckError::Signal(e)),
        },
    };

    if let Err(e) = operator.close().await {
        tracing::warn!(error = %e, "failed to close operator");
    }

    let failed = outcome?;
    if failed > 0 {
        return Err(CheckError::Failed { failed, total: eff.guarantees.len() });
    }
    Ok(())
}
