pub mod parse_osm;

use std::path::Path;
use log::{info, error};

use crate::errors::Result;


/// One cached loading stage. Its output is persisted under the work dir so
/// later runs can skip the work.
pub trait Etl {
    type Input;
    type Output;

    fn etl_name(&self) -> &str;

    fn is_cached(&self, dir: &Path) -> Result<bool>;
    fn clean(&self, dir: &Path) -> Result<()>;

    fn extract(&mut self, dir: &Path) -> Result<Self::Input>;
    fn transform(&mut self, input: Self::Input) -> Result<Self::Output>;
    fn load(&mut self, dir: &Path, output: &Self::Output) -> Result<()>;
    fn read_cache(&mut self, dir: &Path) -> Result<Self::Output>;

    fn process(&mut self, dir: &Path) -> Result<Self::Output> {
        info!(etl_name = self.etl_name(); "Starting ETL process");
        if self.is_cached(dir)? {
            info!(etl_name = self.etl_name(); "Using cached value");
            match self.read_cache(dir) {
                Ok(output) => {
                    info!(etl_name = self.etl_name(); "Process finished");
                    return Ok(output);
                },
                Err(err) => {
                    error!(etl_name = self.etl_name(), err = err.message; "Cache unreadable, rebuilding");
                    self.clean(dir)?;
                },
            }
        }

        info!(etl_name = self.etl_name(); "Extracting");
        let input = match self.extract(dir) {
            Ok(input) => Ok(input),
            Err(err) => {
                error!(etl_name = self.etl_name(), err = err.message; "Extraction failed with error");
                Err(err)
            },
        }?;

        info!(etl_name = self.etl_name(); "Transforming");
        let output = match self.transform(input) {
            Ok(output) => Ok(output),
            Err(err) => {
                error!(etl_name = self.etl_name(), err = err.message; "Transformation failed with error");
                Err(err)
            },
        }?;

        info!(etl_name = self.etl_name(); "Loading");
        match self.load(dir, &output) {
            Ok(_) => Ok(()),
            Err(err) => {
                error!(etl_name = self.etl_name(), err = err.message; "Loading failed with error");
                Err(err)
            },
        }?;
        info!(etl_name = self.etl_name(); "Process finished");
        Ok(output)
    }
}
