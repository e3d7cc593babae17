//! Main entry point for CLI command to start the upload server.

use anyhow::Result;

fn main() -> Result<()> {
    graphql_upload::main()
}
