use ndfront_net::{evaluate, HostInterfaces, InterfaceSource};
use tracing::debug;

use crate::cmd::InterfacesArgs;
use crate::exit::{net_error, CliResult, SUCCESS};
use crate::output::{print_interfaces, InterfaceOutput, OutputFormat};

pub fn run(args: InterfacesArgs, format: OutputFormat) -> CliResult<i32> {
    let host = HostInterfaces::open(&args.sysctl_root)
        .map_err(|err| net_error("cannot query interfaces", err))?;
    let interfaces = host
        .interfaces()
        .map_err(|err| net_error("cannot list interfaces", err))?;

    let mut rows = Vec::new();
    for (index, name) in interfaces {
        let info = evaluate(&host, index, &name)
            .map_err(|err| net_error(&format!("cannot evaluate {name}"), err))?;
        match info {
            Some(info) => rows.push(InterfaceOutput::new(&name, &info)),
            None => debug!(if_index = index, if_name = %name, "autoconf disabled"),
        }
    }

    print_interfaces(&rows, format);
    Ok(SUCCESS)
}
