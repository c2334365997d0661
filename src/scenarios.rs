//! Resolution scenarios.
//!
//! The suite declares the configured dependencies, then resolves them under
//! several build configurations and checks each output tree against its
//! expected reference tree.

use crate::compare::{ComparePolicy, compare_trees_with};
use crate::host::{
    BUILD_SYSTEM, BuildSettings, EXPORT_PROJECT, Host, ProjectLayout, SettingValue,
};
use crate::result::{TestCase, TestResult};
use crate::schema::{BuildSystem, Dependency};
use anyhow::Context;
use std::sync::Arc;

/// Name of the test case that only declares dependencies.
pub const SETUP_DEPENDENCIES: &str = "SetupDependencies";

/// One build configuration and the reference tree it must produce.
#[derive(Debug, Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub build_system: BuildSystem,
    pub export_project: bool,
    /// Reference tree, relative to the expected artifacts root.
    pub expected_subdir: &'static str,
}

pub const RESOLUTION_SCENARIOS: [Scenario; 3] = [
    Scenario {
        name: "ResolveForGradleBuildSystem",
        build_system: BuildSystem::Gradle,
        export_project: false,
        expected_subdir: "NoExport/Gradle",
    },
    Scenario {
        name: "ResolveForInternalBuildSystem",
        build_system: BuildSystem::Internal,
        export_project: false,
        expected_subdir: "NoExport/Internal",
    },
    Scenario {
        name: "ResolveForGradleBuildSystemAndExport",
        build_system: BuildSystem::Gradle,
        export_project: true,
        expected_subdir: "Export/Gradle",
    },
];

/// Everything the scenarios share.
pub struct SuiteContext {
    pub host: Host,
    pub layout: ProjectLayout,
    pub dependencies: Vec<Dependency>,
    pub policy: ComparePolicy,
    pub clean_output: bool,
}

/// The fixed, ordered list of test cases.
pub fn build_suite(context: Arc<SuiteContext>) -> Vec<TestCase> {
    let mut cases = vec![setup_dependencies(Arc::clone(&context))];
    cases.extend(
        RESOLUTION_SCENARIOS
            .iter()
            .map(|scenario| resolution(Arc::clone(&context), *scenario)),
    );
    cases
}

fn setup_dependencies(context: Arc<SuiteContext>) -> TestCase {
    TestCase::new(SETUP_DEPENDENCIES, move |completion| {
        declare_dependencies(&context)?;
        completion.complete(TestResult::passed());
        Ok(())
    })
}

fn declare_dependencies(context: &SuiteContext) -> anyhow::Result<()> {
    for dependency in &context.dependencies {
        context
            .host
            .registry
            .declare(dependency)
            .with_context(|| format!("failed to declare {dependency}"))?;
    }
    Ok(())
}

fn resolution(context: Arc<SuiteContext>, scenario: Scenario) -> TestCase {
    TestCase::new(scenario.name, move |completion| {
        declare_dependencies(&context)?;

        let settings = context.host.settings.as_ref();
        let build_system = SettingValue::from(scenario.build_system);
        if !settings.supports(BUILD_SYSTEM, &build_system) {
            completion.complete(TestResult::skipped(format!(
                "Build system {} is not available in this environment",
                scenario.build_system
            )));
            return Ok(());
        }

        let requested = [
            (BUILD_SYSTEM, build_system),
            (EXPORT_PROJECT, SettingValue::from(scenario.export_project)),
        ];
        for (name, value) in requested {
            if let Err(message) = apply_setting(settings, name, value) {
                completion.complete(TestResult::failed([message]));
                return Ok(());
            }
        }

        let output_dir = context.layout.output_dir.clone();
        if context.clean_output && output_dir.exists() {
            std::fs::remove_dir_all(&output_dir)
                .with_context(|| format!("failed to clear {}", output_dir.display()))?;
        }

        let expected_dir = context.layout.expected_dir.join(scenario.expected_subdir);
        let verifier = Arc::clone(&context);
        context.host.resolver.resolve(Box::new(move |success| {
            let mut error_messages = Vec::new();
            if !success {
                error_messages.push(format!("Resolution failed for {}", scenario.name));
            }
            error_messages.extend(
                compare_trees_with(&expected_dir, &output_dir, &verifier.policy)
                    .iter()
                    .map(ToString::to_string),
            );
            completion.complete(TestResult {
                error_messages,
                ..TestResult::default()
            });
        }));
        Ok(())
    })
}

/// Set a build option and confirm the host actually applied it.
fn apply_setting(
    settings: &dyn BuildSettings,
    name: &str,
    value: SettingValue,
) -> Result<(), String> {
    if !settings.set(name, value.clone()) {
        return Err(format!("Failed to set {name} to {value}"));
    }
    match settings.get(name) {
        Some(actual) if actual == value => Ok(()),
        Some(actual) => Err(format!("{name} is {actual} after setting it to {value}")),
        None => Err(format!("{name} is unset after setting it to {value}")),
    }
}
