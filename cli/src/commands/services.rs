//! Services command implementation

use anyhow::Result;
use aperture_store::{Backends, Context, Reader, StorageError};

pub async fn run(ctx: &Context, backends: &Backends) -> Result<()> {
    let services = match backends.reader.list_services(ctx).await {
        Ok(services) => services,
        Err(StorageError::NotFound) => {
            println!("No services stored.");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    };

    for service in services {
        println!("{}", service);
    }
    Ok(())
}
