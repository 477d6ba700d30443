//! One value of every command, payload and result shape, shared by the codec tests.

use std::time::{Duration, UNIX_EPOCH};

use crate::bandwidth::Bandwidth;
use crate::command::{
    CommandResult, ConsumeOutcome, ConsumptionProbe, EstimationProbe, Payload, RemoteCommand,
    RemoteError,
};
use crate::config::{BucketConfiguration, TokensInheritanceStrategy};
use crate::remote_state::RemoteBucketState;

pub(crate) fn plain_config() -> BucketConfiguration {
    let first_refill = UNIX_EPOCH + Duration::from_secs(1_700_000_000);
    BucketConfiguration::new(vec![
        Bandwidth::greedy(100, 10, Duration::from_secs(60)).unwrap().with_initial_tokens(40).unwrap(),
        Bandwidth::intervally(20, 20, Duration::from_secs(1)).unwrap(),
        Bandwidth::intervally_aligned(500, 500, Duration::from_secs(3_600), first_refill, true).unwrap(),
    ])
    .unwrap()
}

pub(crate) fn config_with_ids() -> BucketConfiguration {
    BucketConfiguration::new(vec![
        Bandwidth::simple(10, Duration::from_secs(1)).unwrap().with_id("burst").unwrap(),
        Bandwidth::simple(1_000, Duration::from_secs(3_600)).unwrap(),
    ])
    .unwrap()
}

pub(crate) fn plain_state() -> RemoteBucketState {
    // Half an hour before the aligned bandwidth's first refill.
    let now = 1_699_998_200 * 1_000_000_000;
    let mut state = RemoteBucketState::new(plain_config(), now);
    state.try_consume(7, now + 1_500_000_000);
    state
}

pub(crate) fn versioned_state() -> RemoteBucketState {
    let mut state = RemoteBucketState::with_version(config_with_ids(), 4, 1_000);
    state.try_consume(3, 2_000);
    state
}

pub(crate) fn commands() -> Vec<RemoteCommand> {
    let try_consume = Box::new(RemoteCommand::TryConsume { tokens: 2 });
    vec![
        RemoteCommand::TryConsume { tokens: 1 },
        RemoteCommand::Consume { tokens: 3 },
        RemoteCommand::TryConsumeAndReturnRemaining { tokens: 4 },
        RemoteCommand::ConsumeAsMuchAsPossible { limit: i64::MAX },
        RemoteCommand::EstimateAbilityToConsume { tokens: 5 },
        RemoteCommand::GetAvailableTokens,
        RemoteCommand::ReserveAndCalculateTimeToSleep { tokens: 6, max_wait_nanos: i64::MAX },
        RemoteCommand::AddTokens { tokens: 7 },
        RemoteCommand::ForceAddTokens { tokens: -8 },
        RemoteCommand::ConsumeIgnoringRateLimits { tokens: 9 },
        RemoteCommand::Reset,
        RemoteCommand::ReplaceConfiguration {
            configuration: plain_config(),
            strategy: TokensInheritanceStrategy::Proportionally,
        },
        RemoteCommand::ReplaceConfiguration {
            configuration: config_with_ids(),
            strategy: TokensInheritanceStrategy::Additive,
        },
        RemoteCommand::GetConfiguration,
        RemoteCommand::CreateSnapshot,
        RemoteCommand::Sync { unsynchronized_tokens: 10, nanos_since_last_sync: 1_000_000 },
        RemoteCommand::CreateInitialStateAndExecute { configuration: plain_config(), command: try_consume.clone() },
        RemoteCommand::CheckConfigurationVersionAndExecute { desired_version: 3, command: try_consume.clone() },
        RemoteCommand::InitOrReplaceConfigurationAndExecute {
            configuration: config_with_ids(),
            desired_version: 3,
            strategy: TokensInheritanceStrategy::AsIs,
            command: try_consume,
        },
        RemoteCommand::Multi {
            commands: vec![
                RemoteCommand::GetAvailableTokens,
                RemoteCommand::Multi { commands: vec![RemoteCommand::Reset] },
                RemoteCommand::ReplaceConfiguration {
                    configuration: plain_config(),
                    strategy: TokensInheritanceStrategy::Reset,
                },
            ],
        },
        RemoteCommand::Multi { commands: Vec::new() },
    ]
}

pub(crate) fn results() -> Vec<CommandResult> {
    let payloads = vec![
        Payload::Nothing,
        Payload::Bool(true),
        Payload::Long(-42),
        Payload::Outcome(ConsumeOutcome::Consumed { remaining: 3 }),
        Payload::Outcome(ConsumeOutcome::Insufficient { available: 1 }),
        Payload::ConsumptionProbe(ConsumptionProbe {
            consumed: false,
            remaining_tokens: 0,
            nanos_to_wait_for_refill: 250_000_000,
            nanos_to_wait_for_reset: 1_000_000_000,
        }),
        Payload::EstimationProbe(EstimationProbe {
            can_be_consumed: true,
            remaining_tokens: 9,
            nanos_to_wait_for_refill: 0,
        }),
        Payload::Configuration(plain_config()),
        Payload::Configuration(config_with_ids()),
        Payload::Snapshot(plain_state()),
        Payload::Snapshot(versioned_state()),
        Payload::Multi(vec![
            CommandResult::success(Payload::Long(1), true),
            CommandResult::BucketNotFound,
            CommandResult::read_only(Payload::Bool(false)),
        ]),
    ];
    let mut results: Vec<CommandResult> = payloads
        .into_iter()
        .flat_map(|payload| {
            [CommandResult::success(payload.clone(), true), CommandResult::read_only(payload)]
        })
        .collect();
    results.extend([
        CommandResult::BucketNotFound,
        CommandResult::ConfigurationNeedToBeReplaced,
        CommandResult::Error(RemoteError::UnsupportedType { type_id: 77 }),
        CommandResult::Error(RemoteError::UnsupportedVersion { requested: 3, supported: 2 }),
    ]);
    results
}
