//! Command-line parsing.

use anyhow::{anyhow, bail, Context};
use lodestar_gpu::{DeviceType, QueueRoles, RequirementSet, ValidationLayers};

/// Parsed probe options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ProbeArgs {
    pub require_ext: Vec<String>,
    pub request_ext: Vec<String>,
    pub prefer: Option<DeviceType>,
    pub require_type: Option<DeviceType>,
    pub min_memory_mb: Option<u64>,
    pub dedicated_compute: bool,
    pub dedicated_transfer: bool,
    pub validation: bool,
    pub create_device: bool,
    pub help: bool,
}

impl ProbeArgs {
    /// Parse arguments, not including the program name.
    pub fn parse<I>(args: I) -> anyhow::Result<Self>
    where
        I: IntoIterator<Item = String>,
    {
        let mut parsed = Self::default();
        let mut args = args.into_iter();

        while let Some(arg) = args.next() {
            let mut value = |flag: &str| {
                args.next()
                    .ok_or_else(|| anyhow!("{flag} expects a value"))
            };

            match arg.as_str() {
                "--require-ext" => parsed.require_ext.push(value(arg.as_str())?),
                "--request-ext" => parsed.request_ext.push(value(arg.as_str())?),
                "--prefer" => parsed.prefer = Some(parse_device_type(&value(arg.as_str())?)?),
                "--require-type" => {
                    parsed.require_type = Some(parse_device_type(&value(arg.as_str())?)?);
                }
                "--min-memory-mb" => {
                    let raw = value(arg.as_str())?;
                    let mb: u64 = raw
                        .parse()
                        .with_context(|| format!("invalid --min-memory-mb value {raw:?}"))?;
                    if mb.checked_mul(1024 * 1024).is_none() {
                        bail!("--min-memory-mb value {mb} is too large");
                    }
                    parsed.min_memory_mb = Some(mb);
                }
                "--dedicated-compute" => parsed.dedicated_compute = true,
                "--dedicated-transfer" => parsed.dedicated_transfer = true,
                "--validation" => parsed.validation = true,
                "--create-device" => parsed.create_device = true,
                "-h" | "--help" => parsed.help = true,
                other => bail!("unknown argument {other:?} (see --help)"),
            }
        }

        Ok(parsed)
    }

    /// Device requirements these options describe.
    pub fn requirements(&self) -> RequirementSet {
        let mut requirements = RequirementSet::new()
            .require_extensions(self.require_ext.iter().cloned());

        for ext in &self.request_ext {
            requirements = requirements.request_extension(ext.clone());
        }
        if let Some(device_type) = self.prefer {
            requirements = requirements.prefer_type(device_type);
        }
        if let Some(device_type) = self.require_type {
            requirements = requirements.prefer_type(device_type).allow_any_type(false);
        }
        if let Some(mb) = self.min_memory_mb {
            requirements = requirements.require_memory(mb.saturating_mul(1024 * 1024));
        }
        if self.dedicated_compute {
            requirements = requirements.request_flags(QueueRoles::DEDICATED_COMPUTE);
        }
        if self.dedicated_transfer {
            requirements = requirements.request_flags(QueueRoles::DEDICATED_TRANSFER);
        }
        requirements
    }

    pub fn validation_layers(&self) -> ValidationLayers {
        if self.validation {
            ValidationLayers::Require
        } else {
            ValidationLayers::Off
        }
    }
}

fn parse_device_type(name: &str) -> anyhow::Result<DeviceType> {
    match name.to_ascii_lowercase().as_str() {
        "discrete" => Ok(DeviceType::Discrete),
        "integrated" => Ok(DeviceType::Integrated),
        "virtual" => Ok(DeviceType::Virtual),
        "cpu" => Ok(DeviceType::Cpu),
        "other" => Ok(DeviceType::Other),
        _ => bail!(
            "unknown device type {name:?} (expected discrete, integrated, virtual, cpu or other)"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> anyhow::Result<ProbeArgs> {
        ProbeArgs::parse(args.iter().map(|s| (*s).to_string()))
    }

    #[test]
    fn parses_all_flags() {
        let args = parse(&[
            "--require-ext",
            "VK_KHR_swapchain",
            "--request-ext",
            "VK_EXT_mesh_shader",
            "--prefer",
            "Integrated",
            "--min-memory-mb",
            "2048",
            "--dedicated-compute",
            "--create-device",
        ])
        .unwrap();

        assert_eq!(args.require_ext, vec!["VK_KHR_swapchain"]);
        assert_eq!(args.request_ext, vec!["VK_EXT_mesh_shader"]);
        assert_eq!(args.prefer, Some(DeviceType::Integrated));
        assert_eq!(args.min_memory_mb, Some(2048));
        assert!(args.dedicated_compute);
        assert!(!args.dedicated_transfer);
        assert!(args.create_device);
        assert_eq!(args.validation_layers(), ValidationLayers::Off);
    }

    #[test]
    fn rejects_bad_input() {
        assert!(parse(&["--prefer", "quantum"]).is_err());
        assert!(parse(&["--min-memory-mb", "lots"]).is_err());
        assert!(parse(&["--require-ext"]).is_err());
        assert!(parse(&["--frobnicate"]).is_err());

        let err = parse(&["--min-memory-mb", &u64::MAX.to_string()]).unwrap_err();
        assert!(err.to_string().contains("too large"));
        assert!(parse(&["--min-memory-mb", "17592186044415"]).is_ok());
    }

    #[test]
    fn dedicated_queues_are_preferences() {
        let args = parse(&["--require-type", "cpu", "--dedicated-transfer"]).unwrap();
        let requirements = args.requirements();
        assert_eq!(
            requirements.requested_roles(),
            QueueRoles::DEDICATED_TRANSFER
        );
        assert_eq!(requirements.required_roles(), QueueRoles::GRAPHICS);
    }
}
