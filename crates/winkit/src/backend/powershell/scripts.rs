//! PowerShell sources for every (kind, verb) pair.
//!
//! Scripts read one JSON document from stdin into `$in`. List scripts write a
//! JSON array of records; they may over-report, the caller filters. An object
//! with no record form is written as `{id, unsupported}` rather than left out.
//! Failures print the exception message and the fully-qualified error id to
//! stderr and exit 1.

use super::Verb;
use crate::backend::MANAGED_FIREWALL_GROUP;
use crate::types::RecordKind;

const PRELUDE: &str = r##"
$ErrorActionPreference = 'Stop'
$ProgressPreference = 'SilentlyContinue'
function Out-Records($items) { ConvertTo-Json -InputObject @($items) -Depth 6 -Compress }
function Throw-NotFound([string]$message) { throw [System.Management.Automation.ItemNotFoundException]::new($message) }
try {
$in = [Console]::In.ReadToEnd() | ConvertFrom-Json
"##;

const EPILOGUE: &str = r##"
} catch {
    [Console]::Error.WriteLine($_.Exception.Message)
    [Console]::Error.WriteLine($_.FullyQualifiedErrorId)
    exit 1
}
"##;

const REGISTRY_HELPERS: &str = r##"
$Hives = @{ HKLM = 'HKEY_LOCAL_MACHINE'; HKCU = 'HKEY_CURRENT_USER'; HKCR = 'HKEY_CLASSES_ROOT'; HKU = 'HKEY_USERS'; HKCC = 'HKEY_CURRENT_CONFIG' }
function Get-KeyPath([string]$key) {
    $hive, $rest = $key -split '\\', 2
    'Registry::' + $Hives[$hive] + '\' + $rest
}
function Split-ValueId([string]$id) {
    $i = $id.LastIndexOf('\')
    @{ Key = $id.Substring(0, $i); Name = $id.Substring($i + 1) }
}
"##;

const REGISTRY_LIST: &str = r##"
$keys = @($in.ids | ForEach-Object { (Split-ValueId $_).Key } | Sort-Object -Unique)
$result = foreach ($key in $keys) {
    $item = Get-Item -LiteralPath (Get-KeyPath $key) -ErrorAction SilentlyContinue
    if ($null -eq $item) { continue }
    foreach ($name in $item.GetValueNames()) {
        if ($name -eq '') { continue }
        $type = switch ($item.GetValueKind($name).ToString()) {
            'String' { 'string' }
            'ExpandString' { 'expand_string' }
            'DWord' { 'dword' }
            'QWord' { 'qword' }
            default { $null }
        }
        if ($null -eq $type) {
            [pscustomobject]@{ id = "$key\$name"; unsupported = "registry type $($item.GetValueKind($name))" }
            continue
        }
        $data = $item.GetValue($name, $null, 'DoNotExpandEnvironmentNames')
        if ($type -eq 'dword') { $data = [BitConverter]::ToUInt32([BitConverter]::GetBytes([int32]$data), 0) }
        if ($type -eq 'qword') { $data = [BitConverter]::ToUInt64([BitConverter]::GetBytes([int64]$data), 0) }
        [pscustomobject]@{ id = "$key\$name"; type = $type; data = $data }
    }
}
Out-Records $result
"##;

const REGISTRY_PUT: &str = r##"
$v = Split-ValueId $in.id
$path = Get-KeyPath $v.Key
if (-not (Test-Path -LiteralPath $path)) { New-Item -Path $path -Force | Out-Null }
$kind = @{ string = 'String'; expand_string = 'ExpandString'; dword = 'DWord'; qword = 'QWord' }[$in.type]
$data = $in.data
if ($in.type -eq 'dword') { $data = [BitConverter]::ToInt32([BitConverter]::GetBytes([uint32]$data), 0) }
if ($in.type -eq 'qword') { $data = [BitConverter]::ToInt64([BitConverter]::GetBytes([uint64]$data), 0) }
New-ItemProperty -LiteralPath $path -Name $v.Name -PropertyType $kind -Value $data -Force | Out-Null
"##;

const REGISTRY_REMOVE: &str = r##"
$v = Split-ValueId $in.id
Remove-ItemProperty -LiteralPath (Get-KeyPath $v.Key) -Name $v.Name
"##;

const FIREWALL_LIST: &str = r##"
$rules = @(Get-NetFirewallRule -ErrorAction SilentlyContinue | Where-Object {
    ($in.enumerate -and $_.Group -eq '{managed_group}') -or ($in.ids -ccontains $_.DisplayName)
})
$result = foreach ($rule in $rules) {
    $ports = $rule | Get-NetFirewallPortFilter
    $app = $rule | Get-NetFirewallApplicationFilter
    $protocol = "$($ports.Protocol)".ToLower()
    $localPort = "$($ports.LocalPort)"
    if (@('tcp', 'udp', 'any') -notcontains $protocol) {
        [pscustomobject]@{ id = $rule.DisplayName; unsupported = "protocol $protocol" }
        continue
    }
    if ($localPort -notmatch '^(\d+|Any)$') {
        [pscustomobject]@{ id = $rule.DisplayName; unsupported = "local port $localPort" }
        continue
    }
    $o = [ordered]@{
        id = $rule.DisplayName
        direction = $rule.Direction.ToString().ToLower()
        action = $rule.Action.ToString().ToLower()
        protocol = $protocol
        enabled = ($rule.Enabled.ToString() -eq 'True')
        group = $rule.Group
    }
    if ($localPort -match '^\d+$') { $o.port = [int]$localPort }
    if ($app.Program -and $app.Program -ne 'Any') { $o.program = $app.Program }
    [pscustomobject]$o
}
Out-Records $result
"##;

const FIREWALL_HELPERS: &str = r##"
function Get-RulesNamed([string]$name) {
    $rules = @(Get-NetFirewallRule -ErrorAction SilentlyContinue | Where-Object { $_.DisplayName -ceq $name })
    if ($rules.Count -gt 1) { throw "firewall rule name '$name' is shared by $($rules.Count) rules" }
    $rules
}
"##;

const FIREWALL_PUT: &str = r##"
Get-RulesNamed $in.id | Remove-NetFirewallRule
$params = @{
    DisplayName = $in.id
    Direction = $in.direction
    Action = $in.action
    Protocol = if ($in.protocol -eq 'any') { 'Any' } else { $in.protocol.ToUpper() }
    Enabled = if ($in.enabled) { 'True' } else { 'False' }
}
if ($in.group) { $params.Group = $in.group }
if ($in.port) { $params.LocalPort = [string]$in.port }
if ($in.program) { $params.Program = $in.program }
New-NetFirewallRule @params | Out-Null
"##;

const FIREWALL_REMOVE: &str = r##"
$rules = @(Get-RulesNamed $in.id)
if ($rules.Count -eq 0) { Throw-NotFound "firewall rule '$($in.id)' does not exist" }
$rules | Remove-NetFirewallRule
"##;

const SERVICE_LIST: &str = r##"
$result = foreach ($svc in @(Get-CimInstance -ClassName Win32_Service)) {
    if (-not ($in.ids -contains $svc.Name)) { continue }
    $start = switch ($svc.StartMode) {
        'Auto' { if ($svc.DelayedAutoStart) { 'delayed' } else { 'automatic' } }
        'Disabled' { 'disabled' }
        default { 'manual' }
    }
    $o = [ordered]@{ id = $svc.Name; start_type = $start; display_name = $svc.DisplayName; binary_path = $svc.PathName }
    if ($svc.State -eq 'Running') { $o.state = 'running' }
    if ($svc.State -eq 'Stopped') { $o.state = 'stopped' }
    [pscustomobject]$o
}
Out-Records $result
"##;

const SERVICE_PUT: &str = r##"
function Invoke-Sc([string[]]$arguments) {
    & sc.exe @arguments | Out-Null
    if ($LASTEXITCODE -ne 0) { throw "sc.exe $($arguments[0]) failed with exit code $LASTEXITCODE" }
}
$startup = @{ automatic = 'Automatic'; delayed = 'Automatic'; manual = 'Manual'; disabled = 'Disabled' }[$in.start_type]
if ($null -eq (Get-Service -Name $in.id -ErrorAction SilentlyContinue)) {
    $params = @{ Name = $in.id; BinaryPathName = $in.binary_path; StartupType = $startup }
    if ($in.display_name) { $params.DisplayName = $in.display_name }
    New-Service @params | Out-Null
} else {
    Set-Service -Name $in.id -StartupType $startup
    if ($in.display_name) { Set-Service -Name $in.id -DisplayName $in.display_name }
    if ($in.binary_path) { Invoke-Sc @('config', $in.id, 'binPath=', $in.binary_path) }
}
if ($in.start_type -eq 'delayed') { Invoke-Sc @('config', $in.id, 'start=', 'delayed-auto') }
if ($in.start_type -eq 'automatic') { Invoke-Sc @('config', $in.id, 'start=', 'auto') }
if ($in.state -eq 'running') { Start-Service -Name $in.id }
if ($in.state -eq 'stopped') { Stop-Service -Name $in.id -Force }
"##;

const SERVICE_REMOVE: &str = r##"
Stop-Service -Name $in.id -Force -ErrorAction SilentlyContinue
& sc.exe delete $in.id | Out-Null
if ($LASTEXITCODE -eq 1060) { Throw-NotFound "service '$($in.id)' does not exist" }
if ($LASTEXITCODE -eq 1072) { throw "service '$($in.id)' is marked for deletion, try again after a reboot" }
if ($LASTEXITCODE -ne 0) { throw "sc.exe delete failed with exit code $LASTEXITCODE" }
"##;

const ACCOUNT_LIST: &str = r##"
$membership = @{}
foreach ($group in Get-LocalGroup) {
    foreach ($member in @(Get-LocalGroupMember -Group $group -ErrorAction SilentlyContinue)) {
        $name = ($member.Name -split '\\')[-1]
        if (-not $membership.ContainsKey($name)) { $membership[$name] = [System.Collections.Generic.List[string]]::new() }
        $membership[$name].Add($group.Name)
    }
}
$users = foreach ($user in Get-LocalUser) {
    if ($user.SID.Value -match '-50[0-4]$' -and -not ($in.ids -contains $user.Name)) { continue }
    $o = [ordered]@{ id = $user.Name; kind = 'user'; enabled = [bool]$user.Enabled; groups = @($membership[$user.Name] | Where-Object { $_ }) }
    if ($user.FullName) { $o.full_name = $user.FullName }
    if ($user.Description) { $o.description = $user.Description }
    [pscustomobject]$o
}
$groups = foreach ($group in Get-LocalGroup) {
    if ($group.SID.Value -like 'S-1-5-32-*' -and -not ($in.ids -contains $group.Name)) { continue }
    $o = [ordered]@{ id = $group.Name; kind = 'group'; enabled = $true; groups = @() }
    if ($group.Description) { $o.description = $group.Description }
    [pscustomobject]$o
}
Out-Records (@($users) + @($groups))
"##;

const ACCOUNT_PUT: &str = r##"
if ($in.kind -eq 'group') {
    if (Get-LocalGroup -Name $in.id -ErrorAction SilentlyContinue) {
        if ($in.description) { Set-LocalGroup -Name $in.id -Description $in.description }
    } else {
        $params = @{ Name = $in.id }
        if ($in.description) { $params.Description = $in.description }
        New-LocalGroup @params | Out-Null
    }
} else {
    $params = @{ Name = $in.id }
    if ($in.full_name) { $params.FullName = $in.full_name }
    if ($in.description) { $params.Description = $in.description }
    if ($null -eq (Get-LocalUser -Name $in.id -ErrorAction SilentlyContinue)) {
        New-LocalUser @params -NoPassword | Out-Null
    } elseif ($params.Count -gt 1) {
        Set-LocalUser @params
    }
    if ($in.enabled) { Enable-LocalUser -Name $in.id } else { Disable-LocalUser -Name $in.id }
    $wanted = @($in.groups)
    foreach ($group in Get-LocalGroup) {
        $members = @(Get-LocalGroupMember -Group $group -ErrorAction SilentlyContinue | Where-Object { ($_.Name -split '\\')[-1] -eq $in.id })
        $want = $wanted -contains $group.Name
        if ($want -and $members.Count -eq 0) { Add-LocalGroupMember -Group $group -Member $in.id }
        if (-not $want -and $members.Count -gt 0) { Remove-LocalGroupMember -Group $group -Member $in.id }
    }
}
"##;

const ACCOUNT_REMOVE: &str = r##"
if (Get-LocalUser -Name $in.id -ErrorAction SilentlyContinue) { Remove-LocalUser -Name $in.id }
elseif (Get-LocalGroup -Name $in.id -ErrorAction SilentlyContinue) { Remove-LocalGroup -Name $in.id }
else { Throw-NotFound "account '$($in.id)' does not exist" }
"##;

const ENVIRONMENT_HELPERS: &str = r##"
$EnvKeys = @{
    user = 'Registry::HKEY_CURRENT_USER\Environment'
    system = 'Registry::HKEY_LOCAL_MACHINE\SYSTEM\CurrentControlSet\Control\Session Manager\Environment'
}
function Split-VarId([string]$id) {
    $scope, $name = $id -split ':', 2
    @{ Scope = $scope.ToLower(); Name = $name }
}
"##;

const ENVIRONMENT_LIST: &str = r##"
$scopes = @($in.ids | ForEach-Object { (Split-VarId $_).Scope } | Sort-Object -Unique)
$result = foreach ($scope in $scopes) {
    $item = Get-Item -LiteralPath $EnvKeys[$scope]
    foreach ($name in $item.GetValueNames()) {
        if ($name -eq '') { continue }
        [pscustomobject]@{
            id = "${scope}:$name"
            value = [string]$item.GetValue($name, '', 'DoNotExpandEnvironmentNames')
            expand = ($item.GetValueKind($name).ToString() -eq 'ExpandString')
        }
    }
}
Out-Records $result
"##;

const ENVIRONMENT_PUT: &str = r##"
$v = Split-VarId $in.id
$kind = if ($in.expand) { 'ExpandString' } else { 'String' }
New-ItemProperty -LiteralPath $EnvKeys[$v.Scope] -Name $v.Name -PropertyType $kind -Value $in.value -Force | Out-Null
"##;

const ENVIRONMENT_REMOVE: &str = r##"
$v = Split-VarId $in.id
Remove-ItemProperty -LiteralPath $EnvKeys[$v.Scope] -Name $v.Name
"##;

const ACL_LIST: &str = r##"
$Rights = @{ FullControl = 'full_control'; Modify = 'modify'; ReadAndExecute = 'read_execute'; Read = 'read'; Write = 'write' }
$result = foreach ($id in @($in.ids)) {
    if (-not (Test-Path -LiteralPath $id)) { continue }
    $acl = Get-Acl -LiteralPath $id
    $unsupported = $null
    $rules = foreach ($rule in $acl.Access) {
        if ($rule.IsInherited) { continue }
        $rights = $rule.FileSystemRights.ToString() -replace ', Synchronize', ''
        if (-not $Rights.ContainsKey($rights)) { $unsupported = "access right $rights"; continue }
        [pscustomobject]@{
            identity = $rule.IdentityReference.Value
            rights = $Rights[$rights]
            access = $rule.AccessControlType.ToString().ToLower()
            inherit = ($rule.InheritanceFlags.ToString() -ne 'None')
        }
    }
    if ($unsupported) { [pscustomobject]@{ id = $id; unsupported = $unsupported }; continue }
    [pscustomobject]@{ id = $id; owner = $acl.Owner; inheritance = -not $acl.AreAccessRulesProtected; rules = @($rules) }
}
Out-Records $result
"##;

const ACL_PUT: &str = r##"
$Rights = @{ full_control = 'FullControl'; modify = 'Modify'; read_execute = 'ReadAndExecute'; read = 'Read'; write = 'Write' }
if (-not (Test-Path -LiteralPath $in.id)) { New-Item -ItemType Directory -Path $in.id -Force | Out-Null }
$isDir = (Get-Item -LiteralPath $in.id).PSIsContainer
$acl = Get-Acl -LiteralPath $in.id
if ($in.owner) { $acl.SetOwner([System.Security.Principal.NTAccount]::new($in.owner)) }
$acl.SetAccessRuleProtection(-not $in.inheritance, $true)
foreach ($rule in @($acl.Access | Where-Object { -not $_.IsInherited })) { [void]$acl.RemoveAccessRuleSpecific($rule) }
foreach ($rule in @($in.rules)) {
    $flags = if ($rule.inherit -and $isDir) { 'ContainerInherit, ObjectInherit' } else { 'None' }
    $acl.AddAccessRule([System.Security.AccessControl.FileSystemAccessRule]::new($rule.identity, $Rights[$rule.rights], $flags, 'None', $rule.access))
}
Set-Acl -LiteralPath $in.id -AclObject $acl
"##;

const ACL_REMOVE: &str = r##"
if (-not (Test-Path -LiteralPath $in.id)) { Throw-NotFound "path '$($in.id)' does not exist" }
$item = Get-Item -LiteralPath $in.id
if ($item.PSIsContainer -and @(Get-ChildItem -LiteralPath $in.id -Force).Count -eq 0) {
    Remove-Item -LiteralPath $in.id
} else {
    $acl = Get-Acl -LiteralPath $in.id
    $acl.SetAccessRuleProtection($false, $true)
    foreach ($rule in @($acl.Access | Where-Object { -not $_.IsInherited })) { [void]$acl.RemoveAccessRuleSpecific($rule) }
    Set-Acl -LiteralPath $in.id -AclObject $acl
}
"##;

const PACKAGE_LIST: &str = r##"
$tmp = [System.IO.Path]::GetTempFileName()
try {
    & winget export --output $tmp --include-versions --accept-source-agreements --disable-interactivity | Out-Null
    if ((Get-Item -LiteralPath $tmp).Length -eq 0) { throw "winget export failed with exit code $LASTEXITCODE" }
    $data = Get-Content -LiteralPath $tmp -Raw | ConvertFrom-Json
} finally {
    Remove-Item -LiteralPath $tmp -ErrorAction SilentlyContinue
}
$result = foreach ($source in @($data.Sources)) {
    $name = if ($source.SourceDetails.Name -eq 'msstore') { 'msstore' } else { 'winget' }
    foreach ($package in @($source.Packages)) {
        $o = [ordered]@{ id = $package.PackageIdentifier; source = $name }
        if ($package.Version) { $o.version = $package.Version }
        [pscustomobject]$o
    }
}
Out-Records $result
"##;

const PACKAGE_PUT: &str = r##"
$wingetArgs = @('install', '--id', $in.id, '--exact', '--source', $in.source, '--silent',
    '--accept-package-agreements', '--accept-source-agreements', '--disable-interactivity')
if ($in.version) { $wingetArgs += @('--version', $in.version, '--force') }
& winget @wingetArgs | Out-Null
# 0x8A15002B: already installed, no applicable upgrade
if ($LASTEXITCODE -eq -1978335189) { exit 0 }
if ($LASTEXITCODE -eq -1978335125) { throw "another installation is in progress for '$($in.id)'" }
if ($LASTEXITCODE -ne 0) { throw "winget install failed for '$($in.id)' with exit code $LASTEXITCODE" }
"##;

const PACKAGE_REMOVE: &str = r##"
& winget uninstall --id $in.id --exact --silent --accept-source-agreements --disable-interactivity | Out-Null
# 0x8A150014: no installed package matched
if ($LASTEXITCODE -eq -1978335212) { Throw-NotFound "no installed package found matching '$($in.id)'" }
if ($LASTEXITCODE -ne 0) { throw "winget uninstall failed for '$($in.id)' with exit code $LASTEXITCODE" }
"##;

const STARTUP_HELPERS: &str = r##"
$RunKeys = @{
    user_run = 'Registry::HKEY_CURRENT_USER\Software\Microsoft\Windows\CurrentVersion\Run'
    machine_run = 'Registry::HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\Run'
}
$ApprovedKeys = @{
    user_run = 'Registry::HKEY_CURRENT_USER\Software\Microsoft\Windows\CurrentVersion\Explorer\StartupApproved\Run'
    machine_run = 'Registry::HKEY_LOCAL_MACHINE\Software\Microsoft\Windows\CurrentVersion\Explorer\StartupApproved\Run'
}
function Test-Approved([string]$location, [string]$name) {
    $item = Get-Item -LiteralPath $ApprovedKeys[$location] -ErrorAction SilentlyContinue
    if ($null -eq $item) { return $true }
    $bytes = $item.GetValue($name, $null)
    if ($null -eq $bytes) { return $true }
    return ($bytes[0] % 2) -eq 0
}
"##;

const STARTUP_LIST: &str = r##"
$result = foreach ($location in @('user_run', 'machine_run')) {
    $item = Get-Item -LiteralPath $RunKeys[$location] -ErrorAction SilentlyContinue
    if ($null -eq $item) { continue }
    foreach ($name in $item.GetValueNames()) {
        if ($name -eq '') { continue }
        [pscustomobject]@{
            id = $name
            command = [string]$item.GetValue($name)
            location = $location
            enabled = (Test-Approved $location $name)
        }
    }
}
Out-Records $result
"##;

const STARTUP_PUT: &str = r##"
foreach ($location in @('user_run', 'machine_run')) {
    if ($location -ne $in.location) {
        Remove-ItemProperty -LiteralPath $RunKeys[$location] -Name $in.id -ErrorAction SilentlyContinue
    }
}
New-ItemProperty -LiteralPath $RunKeys[$in.location] -Name $in.id -PropertyType String -Value $in.command -Force | Out-Null
$approved = $ApprovedKeys[$in.location]
if (-not (Test-Path -LiteralPath $approved)) { New-Item -Path $approved -Force | Out-Null }
$flag = if ($in.enabled) { 2 } else { 3 }
New-ItemProperty -LiteralPath $approved -Name $in.id -PropertyType Binary -Value ([byte[]]@($flag, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0)) -Force | Out-Null
"##;

const STARTUP_REMOVE: &str = r##"
$found = $false
foreach ($location in @('user_run', 'machine_run')) {
    $item = Get-Item -LiteralPath $RunKeys[$location] -ErrorAction SilentlyContinue
    if ($item -and $null -ne $item.GetValue($in.id)) {
        Remove-ItemProperty -LiteralPath $RunKeys[$location] -Name $in.id
        Remove-ItemProperty -LiteralPath $ApprovedKeys[$location] -Name $in.id -ErrorAction SilentlyContinue
        $found = $true
    }
}
if (-not $found) { Throw-NotFound "startup entry '$($in.id)' does not exist" }
"##;

const PROBE: &str = r##"
$commands = @{
    firewall_rule = 'Get-NetFirewallRule'
    service = 'Get-CimInstance'
    account = 'Get-LocalUser'
    path_acl = 'Get-Acl'
    package = 'winget'
}
$command = $commands[[string]$in.kind]
if ($null -eq $command -or (Get-Command $command -ErrorAction SilentlyContinue)) { 'true' } else { 'false' }
"##;

const ELEVATED: &str = r##"
$principal = [Security.Principal.WindowsPrincipal][Security.Principal.WindowsIdentity]::GetCurrent()
if ($principal.IsInRole([Security.Principal.WindowsBuiltInRole]::Administrator)) { 'true' } else { 'false' }
"##;

fn wrap(parts: &[&str]) -> String {
    let mut script = String::from(PRELUDE);
    for part in parts {
        script.push_str(part);
    }
    script.push_str(EPILOGUE);
    script.replace("{managed_group}", MANAGED_FIREWALL_GROUP)
}

/// Full script for one (kind, verb) pair.
pub(crate) fn script(kind: RecordKind, verb: Verb) -> String {
    let (helpers, body) = match (kind, verb) {
        (RecordKind::RegistryValue, Verb::List) => (REGISTRY_HELPERS, REGISTRY_LIST),
        (RecordKind::RegistryValue, Verb::Put) => (REGISTRY_HELPERS, REGISTRY_PUT),
        (RecordKind::RegistryValue, Verb::Remove) => (REGISTRY_HELPERS, REGISTRY_REMOVE),
        (RecordKind::FirewallRule, Verb::List) => ("", FIREWALL_LIST),
        (RecordKind::FirewallRule, Verb::Put) => (FIREWALL_HELPERS, FIREWALL_PUT),
        (RecordKind::FirewallRule, Verb::Remove) => (FIREWALL_HELPERS, FIREWALL_REMOVE),
        (RecordKind::Service, Verb::List) => ("", SERVICE_LIST),
        (RecordKind::Service, Verb::Put) => ("", SERVICE_PUT),
        (RecordKind::Service, Verb::Remove) => ("", SERVICE_REMOVE),
        (RecordKind::Account, Verb::List) => ("", ACCOUNT_LIST),
        (RecordKind::Account, Verb::Put) => ("", ACCOUNT_PUT),
        (RecordKind::Account, Verb::Remove) => ("", ACCOUNT_REMOVE),
        (RecordKind::EnvironmentVariable, Verb::List) => (ENVIRONMENT_HELPERS, ENVIRONMENT_LIST),
        (RecordKind::EnvironmentVariable, Verb::Put) => (ENVIRONMENT_HELPERS, ENVIRONMENT_PUT),
        (RecordKind::EnvironmentVariable, Verb::Remove) => (ENVIRONMENT_HELPERS, ENVIRONMENT_REMOVE),
        (RecordKind::PathAcl, Verb::List) => ("", ACL_LIST),
        (RecordKind::PathAcl, Verb::Put) => ("", ACL_PUT),
        (RecordKind::PathAcl, Verb::Remove) => ("", ACL_REMOVE),
        (RecordKind::Package, Verb::List) => ("", PACKAGE_LIST),
        (RecordKind::Package, Verb::Put) => ("", PACKAGE_PUT),
        (RecordKind::Package, Verb::Remove) => ("", PACKAGE_REMOVE),
        (RecordKind::StartupEntry, Verb::List) => (STARTUP_HELPERS, STARTUP_LIST),
        (RecordKind::StartupEntry, Verb::Put) => (STARTUP_HELPERS, STARTUP_PUT),
        (RecordKind::StartupEntry, Verb::Remove) => (STARTUP_HELPERS, STARTUP_REMOVE),
    };
    wrap(&[helpers, body])
}

/// Prints `true` when the API behind `$in.kind` is present.
pub(crate) fn probe() -> String {
    wrap(&[PROBE])
}

/// Prints `true` when the process is elevated.
pub(crate) fn elevated() -> String {
    wrap(&[ELEVATED])
}
